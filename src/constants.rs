pub const BYTES_PER_KB: usize = 1024;
pub const PERCENT_100: f32 = 100.0;

pub const SECONDS_PER_MINUTE: u64 = 60;
pub const SECONDS_PER_HOUR: u64 = 3_600;
pub const SECONDS_PER_DAY: u64 = 86_400;

pub const DEFAULT_IO_BUFFER_SIZE_KB: usize = 64;
pub const OUTPUT_BUFFER_SIZE_KB: usize = 512;
pub const MIN_IO_BUFFER_SIZE_KB: usize = 4;
pub const MAX_IO_BUFFER_SIZE_KB: usize = 16 * 1024;

// File naming for partitions and per-worker side channels
pub const PART_FILE_INFIX: &str = "_Part";
pub const CONSOLE_OUTPUT_SUFFIX: &str = "_ConsoleOutput.txt";
pub const DEFAULT_OUTPUT_SUFFIX: &str = "_results.txt";
pub const DEFAULT_WORK_DIR_NAME: &str = "dms_tool_runner_work";

// MGF spectra are the usual partitioned input
pub const DEFAULT_PARTITION_MARKER: &str = "BEGIN IONS";
pub const DEFAULT_HEADER_PREFIX: &str = ">";
pub const DEFAULT_HEADER_DELIMITER: char = '\t';
pub const DEFAULT_BLOCK_SEPARATOR: &str = "";

pub const DEFAULT_PARTITIONS: usize = 4;
pub const MIN_PARTITIONS: usize = 1;
pub const MAX_PARTITIONS: usize = 64;

pub const DEFAULT_CONFIG_FILE: &str = "dms_tool_runner.json";
