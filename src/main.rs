use std::fs::{self, DirBuilder, File};
use std::io::{BufWriter, Write};
use std::os::unix::fs::{DirBuilderExt, PermissionsExt};
use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use filetime::FileTime;

use bagpack::reader::dir::DirReader;
use bagpack::reader::tar::TarReader;
use bagpack::writer::dir::DirTarget;
use bagpack::writer::tar::TarTarget;
use bagpack::{DigestAlgorithm, Entry, FileDescriptor, PackSource, WriteEvent, Writer};

#[derive(Parser)]
#[command(version, about, long_about = None)]
struct Cli {
    /// Turn debugging information on
    #[arg(short, long, action = clap::ArgAction::Count)]
    debug: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Pack up files into a package (a .tar archive, or a directory).
    Pack {
        /// List of files or directories to pack up.
        #[arg(short, long, required(true), value_delimiter = ' ')]
        input_files: Vec<PathBuf>,
        /// Path to the output package. Ends with .tar for a tar container,
        /// anything else is treated as an output directory.
        #[arg(short, long)]
        output_path: PathBuf,
        /// Digest algorithms to compute while packing (md5, sha1, sha256,
        /// sha512). May be given multiple times.
        #[arg(short = 'a', long = "algorithm")]
        algorithms: Vec<DigestAlgorithm>,
    },
    /// List the entries of an existing package.
    List {
        /// Path to a .tar package or a package directory.
        #[arg(short, long)]
        input_path: PathBuf,
    },
    /// Unpack all files from a .tar package into a directory.
    Extract {
        /// Path to the .tar package file.
        #[arg(short, long)]
        input_path: PathBuf,
        /// Destination directory where all of the contents will be unpacked.
        #[arg(short, long)]
        output_path: PathBuf,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut builder = colog::default_builder();
    match cli.debug {
        0 => {}
        1 => {
            builder.filter_level(log::LevelFilter::Debug);
        }
        _ => {
            builder.filter_level(log::LevelFilter::Trace);
        }
    }
    builder.init();

    match cli.command {
        Command::Pack {
            input_files,
            output_path,
            algorithms,
        } => {
            if input_files.is_empty() {
                bail!("No input files provided. Atleast one input file is required.");
            }
            pack(&input_files, &output_path, &algorithms)?;
            println!("Done.");
        }
        Command::List { input_path } => {
            list(&input_path)?;
        }
        Command::Extract {
            input_path,
            output_path,
        } => {
            if !input_path.is_file() {
                bail!("Input file has to be a .tar package.");
            }
            extract(&input_path, &output_path)?;
            println!("Done.");
        }
    }
    Ok(())
}

fn pack(
    input_files: &[PathBuf],
    output_path: &Path,
    algorithms: &[DigestAlgorithm],
) -> anyhow::Result<()> {
    println!(
        "Creating a package at {}, for files: {}",
        output_path.display(),
        input_files
            .iter()
            .map(|f| f.display().to_string())
            .collect::<Vec<_>>()
            .join(", "),
    );

    let descriptors = collect_descriptors(input_files)?;
    let mut writer = if output_path.extension().and_then(|e| e.to_str()) == Some("tar") {
        Writer::new(TarTarget::new(output_path)?)?
    } else {
        Writer::new(DirTarget::new(output_path))?
    };
    let events = writer.events();

    for descriptor in descriptors {
        writer.add(descriptor, algorithms)?;
    }
    let summary = writer.finish()?;

    for event in events.try_iter() {
        match event {
            WriteEvent::FileAdded {
                descriptor,
                percent_complete,
            } => {
                log::debug!("[{:>5.1}%] {}", percent_complete, descriptor.dest_path);
                for (algorithm, digest) in &descriptor.digests {
                    println!("{} {} {}", algorithm, digest, descriptor.dest_path);
                }
            }
            WriteEvent::Error { message } => log::error!("{}", message),
            WriteEvent::Finished { .. } => {}
        }
    }

    println!(
        "Packed {} of {} files.",
        summary.files_written, summary.files_added
    );
    if let Some(error) = summary.error {
        bail!("Packing failed: {}", error);
    }
    Ok(())
}

/// Walk the inputs and build one descriptor per regular file. A directory
/// input contributes its whole tree, rooted at the directory's own name.
fn collect_descriptors(input_files: &[PathBuf]) -> anyhow::Result<Vec<FileDescriptor>> {
    let mut descriptors = Vec::new();
    for input in input_files {
        let metadata = fs::metadata(input)
            .with_context(|| format!("Unable to read metadata of: {}", input.display()))?;
        let base = input
            .file_name()
            .and_then(|n| n.to_str())
            .with_context(|| "Unable to get filename from path")?
            .to_string();

        if metadata.is_dir() {
            for entry in walkdir::WalkDir::new(input).min_depth(1).sort_by_file_name() {
                let entry = entry.with_context(|| "Walking input directory")?;
                if !entry.file_type().is_file() {
                    continue;
                }
                let suffix = entry
                    .path()
                    .strip_prefix(input)
                    .with_context(|| "Entry escapes input root")?;
                let dest = format!("{}/{}", base, suffix.to_string_lossy());
                descriptors.push(FileDescriptor::from_path(entry.path(), &dest)?);
            }
        } else if metadata.is_file() {
            descriptors.push(FileDescriptor::from_path(input, &base)?);
        } else {
            bail!(
                "Unsupported input (only regular files and directories): {}",
                input.display()
            );
        }
    }
    Ok(descriptors)
}

fn list(input_path: &Path) -> anyhow::Result<()> {
    let mut print_entry = |entry: &Entry<'_>| {
        let size = if entry.stat.size < 0 {
            "-".to_string()
        } else {
            entry.stat.size.to_string()
        };
        println!(
            "{:>12}  {:o}  {}",
            size,
            entry.stat.mode & 0o7777,
            entry.relative_path
        );
    };

    let summary = if input_path.is_dir() {
        DirReader::new(input_path).list(&mut print_entry)
    } else {
        TarReader::new(input_path).list(&mut print_entry)
    };

    println!(
        "{} entries ({} files, {} directories).",
        summary.total_entries(),
        summary.file_count,
        summary.dir_count
    );
    if let Some(error) = summary.error {
        bail!("Listing failed: {}", error);
    }
    Ok(())
}

fn extract(input_path: &Path, output_path: &Path) -> anyhow::Result<()> {
    println!(
        "Unpacking package {} into destination directory: {}",
        input_path.display(),
        output_path.display()
    );
    fs::create_dir_all(output_path)
        .with_context(|| format!("Unable to create output directory: {}", output_path.display()))?;

    let mut reader = TarReader::new(input_path);
    let summary = reader.read(&mut |entry| {
        let dest = output_path.join(&entry.relative_path);
        if entry.stat.is_dir() {
            DirBuilder::new()
                .recursive(true)
                .mode(0o755)
                .create(&dest)
                .with_context(|| format!("Unable to create directory: {}", dest.display()))?;
            return Ok(());
        }
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Unable to create directory: {}", parent.display()))?;
        }
        let file = File::create(&dest)
            .with_context(|| format!("Unable to create file: {}", dest.display()))?;
        let mut writer = BufWriter::new(file);
        let content = entry.content.with_context(|| "Entry is missing content")?;
        std::io::copy(content, &mut writer)?;
        writer.flush()?;
        fs::set_permissions(&dest, fs::Permissions::from_mode(entry.stat.mode & 0o7777))?;
        filetime::set_file_mtime(&dest, FileTime::from_unix_time(entry.stat.mtime, 0))?;
        Ok(())
    });

    println!(
        "Unpacked {} files and {} directories.",
        summary.file_count, summary.dir_count
    );
    if let Some(error) = summary.error {
        bail!("Unpacking failed: {}", error);
    }
    Ok(())
}
