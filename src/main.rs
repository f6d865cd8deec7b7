use anyhow::Result;
use clap::Parser;
use console::style;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use akniga_dl::cli::{Cli, Commands};
use akniga_dl::config::Config;
use akniga_dl::utils::{check_dependencies, format_duration, format_file_size};
use akniga_dl::{BookDownloader, DownloadedBook};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_filter = if cli.verbose { "akniga_dl=debug" } else { "akniga_dl=info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let config = Config::load().await?;

    match cli.command {
        Commands::Download { url, output, archive } => {
            let missing_deps = check_dependencies(&config.media.ffmpeg_path).await;
            if !missing_deps.is_empty() {
                eprintln!("⚠️  Dependency check warnings:");
                for dep in missing_deps {
                    eprintln!("   • {}", dep);
                }
                eprintln!("   (Continuing anyway - tools may be available)");
            }

            let output_root = output.unwrap_or_else(|| config.app.output_dir.clone());
            let downloader = BookDownloader::new(config)?.quiet(cli.quiet);

            tracing::info!("Starting download for URL: {}", url);
            let books = downloader.download(&url, &output_root, archive).await?;

            for book in &books {
                print_summary(book);
            }
        }
        Commands::Config { show } => {
            if show {
                config.display();
            } else {
                config.save().await?;
                println!("Configuration written. Edit the file to change site markers, browser or ffmpeg settings.");
                config.display();
            }
        }
    }

    Ok(())
}

fn print_summary(downloaded: &DownloadedBook) {
    match &downloaded.book {
        Some(book) => {
            let total: f64 = book
                .chapters
                .iter()
                .map(|chapter| chapter.time_finish - chapter.time_from_start)
                .sum();
            println!(
                "{} {} - {}",
                style("✓").green().bold(),
                style(&book.author).bold(),
                style(&book.title_only).bold()
            );
            println!(
                "  {} chapters, {}",
                downloaded.chapter_files.len(),
                format_duration(total)
            );
        }
        None => println!("{} {}", style("✓").green().bold(), downloaded.url),
    }

    if let Some(archive) = &downloaded.archive {
        let size = fs_err::metadata(archive).map(|m| m.len()).unwrap_or(0);
        println!("  Archive: {} ({})", archive.display(), format_file_size(size));
    } else if let Some(book_dir) = &downloaded.book_dir {
        println!("  Saved to: {}", book_dir.display());
    }
}
