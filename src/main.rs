//! machsim - Rewrites iOS device binaries to load as Mac Catalyst or simulator images.
//!
//! Convert individual Mach-O files or every image inside an app bundle.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Instant;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use rayon::prelude::*;
use tracing::{error, info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use machsim::converter::parse_platform;
use machsim::macho::{
    arch_name, fat_slices, filetype_name, load_command_name, locate_slice, parse_arch,
    platform_name, tool_name, FatArch64, MachOImage, PackedVersion,
};
use machsim::{
    convert_file, find_macho_files, ConvertOptions, ConvertReport, PlatformAction, PlatformTarget,
};

/// Rewrites the platform of iOS device Mach-O images.
#[derive(Parser, Debug)]
#[command(name = "machsim")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Rewrite images in place
    Convert {
        /// Architecture to rewrite in fat binaries (e.g., "arm64", "x86_64")
        #[arg(short, long, default_value = "arm64")]
        arch: String,

        /// Platform to declare (e.g., "maccatalyst", "ios-simulator")
        #[arg(short, long, default_value = "maccatalyst")]
        platform: String,

        /// Minimum OS version (e.g., "10.0")
        #[arg(long)]
        min_os: Option<String>,

        /// SDK version (e.g., "14.5")
        #[arg(long)]
        sdk: Option<String>,

        /// Report what would change without writing
        #[arg(long)]
        dry_run: bool,

        /// Rewrite images that are still encrypted
        #[arg(long)]
        allow_encrypted: bool,

        /// Verbosity level (0=quiet, 1=warnings, 2=info, 3=debug)
        #[arg(short, long, default_value = "1")]
        verbosity: u8,

        /// Number of parallel jobs (default: number of CPUs)
        #[arg(short, long)]
        jobs: Option<usize>,

        /// Mach-O files or bundle directories
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },

    /// List Mach-O files inside a directory
    Scan {
        /// Verbosity level (0=quiet, 1=warnings, 2=info, 3=debug)
        #[arg(short, long, default_value = "1")]
        verbosity: u8,

        /// Directory to search
        dir: PathBuf,
    },

    /// Show the slices and load commands of a file
    Info {
        /// Architecture to show in fat binaries
        #[arg(short, long, default_value = "arm64")]
        arch: String,

        /// Verbosity level (0=quiet, 1=warnings, 2=info, 3=debug)
        #[arg(short, long, default_value = "1")]
        verbosity: u8,

        /// Mach-O file
        file: PathBuf,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Convert {
            arch,
            platform,
            min_os,
            sdk,
            dry_run,
            allow_encrypted,
            verbosity,
            jobs,
            paths,
        } => {
            setup_logging(verbosity);
            build_options(
                &arch,
                &platform,
                min_os.as_deref(),
                sdk.as_deref(),
                dry_run,
                allow_encrypted,
            )
            .and_then(|options| cmd_convert(&paths, &options, jobs))
        }
        Commands::Scan { verbosity, dir } => {
            setup_logging(verbosity);
            cmd_scan(&dir)
        }
        Commands::Info {
            arch,
            verbosity,
            file,
        } => {
            setup_logging(verbosity);
            cmd_info(&file, &arch)
        }
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {:#}", e);
            ExitCode::from(exit_code(&e))
        }
    }
}

fn setup_logging(verbosity: u8) {
    let level = match verbosity {
        0 => Level::ERROR,
        1 => Level::WARN,
        2 => Level::INFO,
        _ => Level::DEBUG,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .without_time()
        .finish();

    tracing::subscriber::set_global_default(subscriber).ok();
}

/// Maps the first library error in the chain to its exit code.
fn exit_code(err: &anyhow::Error) -> u8 {
    err.chain()
        .find_map(|cause| cause.downcast_ref::<machsim::Error>())
        .map(machsim::Error::exit_code)
        .unwrap_or(1)
}

fn build_options(
    arch: &str,
    platform: &str,
    min_os: Option<&str>,
    sdk: Option<&str>,
    dry_run: bool,
    allow_encrypted: bool,
) -> Result<ConvertOptions> {
    let Some(cputype) = parse_arch(arch) else {
        bail!("Unknown architecture: {}", arch);
    };

    let mut target = PlatformTarget::for_platform(parse_platform(platform)?);
    if let Some(v) = min_os {
        target = target.with_minos(v.parse::<PackedVersion>()?);
    }
    if let Some(v) = sdk {
        target = target.with_sdk(v.parse::<PackedVersion>()?);
    }

    Ok(ConvertOptions {
        arch: cputype,
        target,
        dry_run,
        allow_encrypted,
    })
}

/// Expands directories into the Mach-O files they contain.
///
/// Files named explicitly are kept even if they do not look like images, so the
/// converter reports why they cannot be rewritten.
fn collect_inputs(paths: &[PathBuf]) -> Result<Vec<PathBuf>> {
    let mut inputs = Vec::new();
    for path in paths {
        if path.is_dir() {
            let found = find_macho_files(path)
                .with_context(|| format!("Failed to scan: {}", path.display()))?;
            if found.is_empty() {
                warn!("No Mach-O files in {}", path.display());
            }
            inputs.extend(found);
        } else {
            inputs.push(path.clone());
        }
    }
    Ok(inputs)
}

fn summarize(path: &Path, report: &ConvertReport) -> String {
    let rewrite = &report.rewrite;
    let removed: Vec<_> = rewrite.removed.iter().map(|r| r.name()).collect();
    format!(
        "{} [{}]: removed {}, build version {} at {:#x}, ncmds {} -> {}, sizeofcmds {:#x} -> {:#x}{}",
        path.display(),
        arch_name(report.cputype),
        if removed.is_empty() {
            "nothing".to_string()
        } else {
            removed.join(", ")
        },
        match rewrite.platform {
            PlatformAction::Patched { .. } => "patched",
            PlatformAction::Inserted { .. } => "inserted",
        },
        rewrite.platform.offset(),
        rewrite.ncmds_before,
        rewrite.ncmds_after,
        rewrite.sizeofcmds_before,
        rewrite.sizeofcmds_after,
        if report.dry_run { " (dry run)" } else { "" }
    )
}

fn cmd_convert(paths: &[PathBuf], options: &ConvertOptions, jobs: Option<usize>) -> Result<()> {
    let start = Instant::now();

    let inputs = collect_inputs(paths)?;
    if inputs.is_empty() {
        warn!("Nothing to convert");
        return Ok(());
    }

    info!("Target: {}", options.target);

    // Single file conversion
    if inputs.len() == 1 {
        let path = &inputs[0];
        let report = convert_file(path, options)
            .with_context(|| format!("Failed to convert: {}", path.display()))?;
        println!("{}", summarize(path, &report));

        info!("Converted in {:.2}s", start.elapsed().as_secs_f64());
        return Ok(());
    }

    // Setup progress bar
    let progress = ProgressBar::new(inputs.len() as u64);
    progress.set_style(
        ProgressStyle::default_bar()
            .template(
                "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta})",
            )?
            .progress_chars("#>-"),
    );

    // Configure thread pool
    if let Some(n) = jobs {
        rayon::ThreadPoolBuilder::new()
            .num_threads(n)
            .build_global()
            .ok();
    }

    let mut errors: Vec<_> = inputs
        .par_iter()
        .filter_map(|path| {
            let result = convert_file(path, options);
            progress.inc(1);

            match result {
                Ok(report) => {
                    progress.println(summarize(path, &report));
                    None
                }
                Err(e) => Some((path.clone(), e)),
            }
        })
        .collect();

    progress.finish_with_message("Done");

    let success = inputs.len() - errors.len();
    info!(
        "Converted {}/{} files in {:.2}s",
        success,
        inputs.len(),
        start.elapsed().as_secs_f64()
    );

    if errors.is_empty() {
        return Ok(());
    }

    warn!("{} files failed to convert:", errors.len());
    for (path, err) in &errors {
        error!("  {}: {}", path.display(), err);
    }

    let failed = errors.len();
    let (path, first) = errors.remove(0);
    Err(anyhow::Error::new(first).context(format!(
        "{} of {} files failed, first: {}",
        failed,
        inputs.len(),
        path.display()
    )))
}

fn cmd_scan(dir: &Path) -> Result<()> {
    if !dir.exists() {
        bail!("Path does not exist: {}", dir.display());
    }

    for path in find_macho_files(dir)? {
        println!("{}", path.display());
    }

    Ok(())
}

/// Formats a fat descriptor, flagging slices that do not fit in the file.
fn format_slice(index: usize, arch: &FatArch64, file_size: u64) -> String {
    let line = format!(
        "  [{:2}] {:<8} {:#010x} align 2^{}",
        index,
        arch_name(arch.cputype),
        arch.offset,
        arch.align
    );
    match arch.end() {
        Some(end) if end <= file_size => format!("{} - {:#010x}", line, end),
        _ => format!("{} size {:#x} (out of bounds)", line, arch.size),
    }
}

fn cmd_info(file: &Path, arch: &str) -> Result<()> {
    let Some(cputype) = parse_arch(arch) else {
        bail!("Unknown architecture: {}", arch);
    };

    let data =
        std::fs::read(file).with_context(|| format!("Failed to read: {}", file.display()))?;

    println!("Mach-O Information");
    println!("==================");
    println!("Path:         {}", file.display());
    println!("Size:         {:#x}", data.len());

    if let Some(archs) = fat_slices(&data)? {
        println!("\nSlices:");
        for (i, arch) in archs.iter().enumerate() {
            println!("{}", format_slice(i, arch, data.len() as u64));
        }
    }

    let slice = locate_slice(&data, cputype)?;
    let image = MachOImage::parse(&data[slice.range()])?;
    let header = &image.header;

    println!("\nImage at {:#x}:", slice.offset);
    println!("  Architecture: {}", arch_name(header.raw.cputype));
    println!("  File type:    {}", filetype_name(header.raw.filetype));
    println!("  Byte order:   {:?}", header.endian);
    println!("  Flags:        {:?}", header.flags());
    println!(
        "  Commands:     {} ({:#x} bytes)",
        header.raw.ncmds, header.raw.sizeofcmds
    );

    println!("\nLoad commands:");
    for (i, lc) in image.commands().enumerate() {
        let lc = lc?;
        println!(
            "  [{:3}] {:#07x} {:<28} {:#x}",
            i,
            lc.offset,
            lc.name(),
            lc.cmdsize
        );
    }

    if let Some(bv) = image.build_version()? {
        println!("\nBuild version:");
        println!("  Platform: {}", platform_name(bv.platform));
        println!("  Min OS:   {}", bv.minos);
        println!("  SDK:      {}", bv.sdk);
        for tool in &bv.tools {
            println!(
                "  Tool:     {} {}",
                tool_name(tool.tool),
                PackedVersion(tool.version)
            );
        }
    }

    if let Some(vm) = image.version_min()? {
        println!("\nMinimum version ({}):", load_command_name(vm.cmd));
        println!("  Version:  {}", vm.version);
        println!("  SDK:      {}", vm.sdk);
    }

    if let Some(enc) = image.encryption_info()? {
        println!("\nEncryption:");
        println!(
            "  Range:    {:#x} - {:#x}",
            enc.cryptoff,
            enc.cryptoff as u64 + enc.cryptsize as u64
        );
        println!(
            "  cryptid:  {}{}",
            enc.cryptid,
            if enc.is_encrypted() { " (encrypted)" } else { "" }
        );
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use machsim::macho::CPU_TYPE_ARM64;

    fn arm64_slice(offset: u64, size: u64) -> FatArch64 {
        FatArch64 {
            cputype: CPU_TYPE_ARM64,
            cpusubtype: 0,
            offset,
            size,
            align: 14,
            reserved: 0,
        }
    }

    #[test]
    fn test_format_slice_in_bounds() {
        let line = format_slice(0, &arm64_slice(0x4000, 0x1000), 0x8000);
        assert_eq!(line, "  [ 0] arm64    0x00004000 align 2^14 - 0x00005000");
    }

    #[test]
    fn test_format_slice_overflowing_descriptor() {
        let line = format_slice(1, &arm64_slice(0xFFFF_FFFF_FFFF_FFF0, 0x100), 0x8000);
        assert!(line.ends_with("size 0x100 (out of bounds)"));

        let line = format_slice(1, &arm64_slice(0x4000, 0x8000), 0x8000);
        assert!(line.ends_with("(out of bounds)"));
    }

    #[test]
    fn test_bad_platform_exits_with_generic_code() {
        let err = build_options("arm64", "beos", None, None, false, false).unwrap_err();
        assert_eq!(exit_code(&err), 1);

        let err = build_options("arm64", "maccatalyst", Some("x.y"), None, false, false)
            .unwrap_err();
        assert_eq!(exit_code(&err), 1);
    }

    #[test]
    fn test_every_subcommand_takes_verbosity() {
        let cli = Cli::try_parse_from(["machsim", "info", "-v", "3", "App"]).unwrap();
        assert!(matches!(cli.command, Commands::Info { verbosity: 3, .. }));

        let cli = Cli::try_parse_from(["machsim", "scan", "Payload"]).unwrap();
        assert!(matches!(cli.command, Commands::Scan { verbosity: 1, .. }));
    }
}
