use clap::Parser;

#[derive(Parser, Debug)]
#[command(name = "remotezip")]
#[command(version)]
#[command(about = "Extract selected files from a remote ZIP using ranged downloads", long_about = None)]
#[command(after_help = "Examples:\n  \
  remotezip -l https://example.com/archive.zip          list files of a remote ZIP\n  \
  remotezip -d out https://example.com/a.zip '*.so'     extract matching files into out/\n  \
  remotezip --cache-dir ~/.cache/remotezip a.zip bin/x  reuse previously extracted files")]
pub struct Cli {
    /// ZIP file path or HTTP URL
    #[arg(value_name = "FILE")]
    pub file: String,

    /// Files to extract (default: all)
    #[arg(value_name = "FILES")]
    pub files: Vec<String>,

    /// List files (short format)
    #[arg(short = 'l')]
    pub list: bool,

    /// List verbosely with sizes, CRC and offsets
    #[arg(short = 'v')]
    pub verbose: bool,

    /// Extract files into exdir
    #[arg(short = 'd', value_name = "DIR", default_value = ".")]
    pub extract_dir: String,

    /// Exclude files that follow
    #[arg(short = 'x', value_name = "FILE", num_args = 1..)]
    pub exclude: Vec<String>,

    /// Read ZIP64 records and extra fields
    #[arg(long)]
    pub zip64: bool,

    /// Cache extracted files here, keyed by name and CRC
    #[arg(long, value_name = "DIR")]
    pub cache_dir: Option<String>,

    /// Maximum number of concurrent range downloads
    #[arg(long, value_name = "N", default_value_t = crate::remote_zip::POOL_MAX_SIZE)]
    pub pool_max: usize,

    /// Upper bound guess of a local file header size, in bytes
    #[arg(long, value_name = "BYTES", default_value_t = 2048)]
    pub header_size_guess: u64,

    /// Re-extract existing files whose CRC does not match the archive
    #[arg(long)]
    pub verify_existing: bool,

    /// Quiet mode (-qq => quieter)
    #[arg(short = 'q', action = clap::ArgAction::Count)]
    pub quiet: u8,
}

impl Cli {
    pub fn is_http_url(&self) -> bool {
        self.file.starts_with("http://") || self.file.starts_with("https://")
    }

    pub fn is_quiet(&self) -> bool {
        self.quiet > 0
    }

    pub fn is_very_quiet(&self) -> bool {
        self.quiet > 1
    }
}
