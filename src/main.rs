//! Main entry point for the remotezip CLI application.
//!
//! Lists or extracts entries of a ZIP archive that lives behind an HTTP URL
//! or on the local filesystem, fetching only the byte ranges it needs.

use anyhow::Result;
use clap::Parser;
use log::info;
use pretty_env_logger::formatted_timed_builder;
use std::path::Path;
use std::sync::Arc;

use remotezip::{
    Cli, FsPartialDownloadCache, HttpRangeDownloader, LocalFileDownloader, RangeDownloader,
    RemoteZip, RemoteZipOptions, ZipCatalog,
};

const DEFAULT_DEBUG_LOG_LEVEL: &str = "remotezip=debug";
const DEFAULT_RELEASE_LOG_LEVEL: &str = "remotezip=info";

fn init_logging(cli: &Cli) -> Result<()> {
    let default_log_level = if cli.is_very_quiet() {
        "remotezip=error"
    } else if cli.is_quiet() {
        "remotezip=warn"
    } else if cfg!(debug_assertions) {
        DEFAULT_DEBUG_LOG_LEVEL
    } else {
        DEFAULT_RELEASE_LOG_LEVEL
    };

    let mut log_builder = formatted_timed_builder();
    log_builder.parse_filters(
        &std::env::var("RUST_LOG").unwrap_or_else(|_| default_log_level.to_string()),
    );
    log_builder.try_init()?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli)?;

    if cli.is_http_url() {
        // Handle remote ZIP file via HTTP Range requests
        let downloader = Arc::new(HttpRangeDownloader::new()?);
        let size = downloader.content_length(&cli.file).await?;

        process_zip(downloader.clone(), size, &cli).await?;

        // Display network transfer statistics for HTTP sources
        if !cli.is_quiet() {
            eprintln!(
                "\nTotal bytes transferred: {}",
                format_size(downloader.transferred_bytes())
            );
        }
    } else {
        let size = LocalFileDownloader::file_size(Path::new(&cli.file)).await?;
        process_zip(Arc::new(LocalFileDownloader::new()), size, &cli).await?;
    }

    Ok(())
}

/// Build the [`RemoteZip`] from CLI options and list or extract.
async fn process_zip(downloader: Arc<dyn RangeDownloader>, size: u64, cli: &Cli) -> Result<()> {
    let options = RemoteZipOptions::default()
        .use_zip64(cli.zip64)
        .pool_max(cli.pool_max)
        .local_header_size_guess(cli.header_size_guess)
        .verify_existing(cli.verify_existing);

    let mut zip = RemoteZip::new(cli.file.clone(), size, downloader).with_options(options);
    if let Some(dir) = &cli.cache_dir {
        zip = zip.with_cache(Arc::new(FsPartialDownloadCache::new(dir)?));
    }

    let catalog = zip.list_entries().await?;

    // List mode: display archive contents and exit
    if cli.list || cli.verbose {
        list_files(&catalog, cli.verbose);
        return Ok(());
    }

    let wanted: Vec<_> = catalog
        .select(&cli.files)
        .into_iter()
        .filter(|e| {
            !cli.exclude
                .iter()
                .any(|x| e.file_name.contains(x.as_str()) || remotezip::catalog::glob_match(x, &e.file_name))
        })
        .collect();

    let summary = zip.download_files(Path::new(&cli.extract_dir), &wanted).await?;
    info!(
        "{} extracted, {} from cache, {} already present ({} in {} ranges)",
        summary.downloaded,
        summary.cache_hits,
        summary.skipped_existing,
        format_size(summary.bytes_downloaded),
        summary.spans
    );

    Ok(())
}

/// Print the catalog, one name per line or as a table in verbose mode.
fn list_files(catalog: &ZipCatalog, verbose: bool) {
    if verbose {
        println!(
            "{:>12}  {:>12}  {:>8}  {:>12}  {:>6}  Name",
            "Length", "Size", "CRC-32", "Offset", "Method"
        );
        println!("{}", "-".repeat(72));
    }

    let mut total_uncompressed = 0u64;
    let mut total_compressed = 0u64;
    let mut file_count = 0usize;

    for entry in catalog.entries() {
        if !verbose {
            println!("{}", entry.file_name);
            continue;
        }

        println!(
            "{:>12}  {:>12}  {:08x}  {:>12}  {:>6}  {}",
            entry.uncompressed_size,
            entry.compressed_size,
            entry.crc,
            entry.local_header_offset,
            entry.compression_method.as_u16(),
            entry.file_name
        );

        if !entry.is_directory() {
            total_uncompressed += entry.uncompressed_size;
            total_compressed += entry.compressed_size;
            file_count += 1;
        }
    }

    if verbose {
        println!("{}", "-".repeat(72));
        println!(
            "{:>12}  {:>12}  {} files",
            total_uncompressed, total_compressed, file_count
        );
    }
}

/// Format a byte size into a human-readable string.
fn format_size(size: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if size >= GB {
        format!("{:.2} GB", size as f64 / GB as f64)
    } else if size >= MB {
        format!("{:.2} MB", size as f64 / MB as f64)
    } else if size >= KB {
        format!("{:.2} KB", size as f64 / KB as f64)
    } else {
        format!("{} bytes", size)
    }
}
