/// Grid divisions per axis; a source is split into `n * n` partitions.
pub const DEFAULT_SQUARE_SPLITS: usize = 2;

/// Points read per chunk while routing. Bounds peak memory of the scan.
pub const DEFAULT_CHUNK_POINTS: usize = 1_000_000;

/// Progress bar template shared by routing and processing stages.
pub const PROGRESS_TEMPLATE: &str = "{prefix} [{bar:40.green/blue}] {pos}/{len} {msg} ({percent}%)";

/// Progress bar fill characters.
pub const PROGRESS_CHARS: &str = "▉▊▋▌▍▎▏ ";
