use anyhow::Result;
use std::fs;
use std::path::Path;
use tempfile::TempDir;

use dms_tool_runner::utils::discover_files;
use dms_tool_runner::Config;

fn create_file(dir: &Path, name: &str, content: &str) -> Result<()> {
    if let Some(parent) = dir.join(name).parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(dir.join(name), content)?;
    Ok(())
}

#[test]
fn test_discover_result_files_by_suffix() -> Result<()> {
    let temp_dir = TempDir::new()?;
    create_file(temp_dir.path(), "run_Part2_results.txt", ">a\t2\t1\n")?;
    create_file(temp_dir.path(), "run_Part1_results.txt", ">a\t1\t1\n")?;
    create_file(temp_dir.path(), "run_Part1_ConsoleOutput.txt", "1/1\n")?;
    create_file(temp_dir.path(), "run_Part1.mgf", "BEGIN IONS\n")?;
    create_file(temp_dir.path(), "nested/run_Part3_results.txt", ">a\t3\t1\n")?;

    let files = discover_files(temp_dir.path(), "_results.txt")?;
    let names: Vec<String> = files
        .iter()
        .map(|f| f.file_name().unwrap().to_string_lossy().into_owned())
        .collect();

    assert_eq!(names.len(), 3);
    assert!(names.contains(&"run_Part1_results.txt".to_string()));
    assert!(names.contains(&"run_Part3_results.txt".to_string()));
    assert!(!names.iter().any(|n| n.ends_with("ConsoleOutput.txt")));
    Ok(())
}

#[test]
fn test_discover_files_empty_directory() -> Result<()> {
    let temp_dir = TempDir::new()?;
    assert!(discover_files(temp_dir.path(), "_results.txt")?.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_default_config_file_loads() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let path = temp_dir.path().join("dms_tool_runner.json");

    Config::default().to_file(&path)?;
    let loaded = Config::load(&path).await?;

    assert_eq!(loaded.job.partitions, Config::default().job.partitions);
    assert_eq!(loaded.merge.input_suffix, "_results.txt");
    Ok(())
}
