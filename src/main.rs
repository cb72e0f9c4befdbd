use std::{
    fs::metadata,
    path::{Path, PathBuf},
    process::exit,
};

use anyhow::{Context, Result};
use clap::{ArgAction, Parser};
use crossterm::style::Stylize;
use inquire::Confirm;
use log::LevelFilter;
use scanmacho::{
    commands::{format_version, CommandKind},
    get_machocputype, get_machomhflags, ArchClass, Macho, MachO, MachoFile, MapOptions,
    MapStrategy,
};

#[derive(Parser, Debug)]
#[command(about = "Inspect Mach-O headers and load commands")]
struct Args {
    /// Files to scan
    #[arg(required = true)]
    files: Vec<PathBuf>,
    /// List every load command
    #[arg(long, short)]
    all: bool,
    /// List linked libraries and rpaths
    #[arg(long, short)]
    needed: bool,
    /// Read files into memory instead of mapping them
    #[arg(long)]
    no_mmap: bool,
    /// Ask before scanning files larger than this many bytes
    #[arg(long, value_name = "BYTES")]
    max_size: Option<u64>,
    /// Run without asking for confirmation
    #[arg(long, short('y'))]
    all_yes: bool,
    /// More log output; repeat for more
    #[arg(long, short, action = ArgAction::Count)]
    verbose: u8,
}

fn main() {
    let args = Args::parse();
    init_logging(args.verbose);

    match args.run() {
        Ok(true) => {}
        Ok(false) => exit(1),
        Err(err) => {
            eprintln!("{} {:#}", "error:".red().bold(), err);
            exit(1);
        }
    }
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Info,
        2 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };
    env_logger::builder()
        .filter_level(level)
        .parse_env(env_logger::Env::new().filter("SCANMACHO_LOG"))
        .init();
}

trait Scan {
    fn ask_for_confirmation(&self, msg: &str) -> Result<bool>;
    fn options_for(&self, path: &Path) -> Result<Option<MapOptions>>;
    fn scan_file(&self, path: &Path) -> Result<bool>;
    fn run(&self) -> Result<bool>;
}

impl Scan for Args {
    fn ask_for_confirmation(&self, msg: &str) -> Result<bool> {
        if self.all_yes {
            return Ok(true);
        }

        Confirm::new(msg)
            .with_default(false)
            .prompt()
            .context("unable to read confirmation")
    }

    /// Map options for `path`, or `None` if the user declined to scan it.
    fn options_for(&self, path: &Path) -> Result<Option<MapOptions>> {
        let strategy = if self.no_mmap {
            MapStrategy::Read
        } else {
            MapStrategy::Mmap
        };

        if let (Some(limit), Ok(meta)) = (self.max_size, metadata(path)) {
            if meta.len() > limit
                && !self.ask_for_confirmation(&format!(
                    "`{}` is {} bytes, over the {} byte limit. Scan anyway?",
                    path.display(),
                    meta.len(),
                    limit
                ))?
            {
                return Ok(None);
            }
        }

        Ok(Some(MapOptions {
            strategy,
            max_size: None,
        }))
    }

    fn scan_file(&self, path: &Path) -> Result<bool> {
        let Some(options) = self.options_for(path)? else {
            println!("{}: {}", path.display(), "skipped".yellow());
            return Ok(true);
        };

        let file = match MachoFile::open_with(path, options) {
            Ok(file) => file,
            Err(err) => {
                eprintln!("{}: {}", path.display(), err.to_string().red());
                return Ok(false);
            }
        };

        let parsed = match file.parse() {
            Ok(parsed) => parsed,
            Err(err) => {
                eprintln!("{}: {}", file.filename().display(), err.to_string().red());
                return Ok(false);
            }
        };

        let mut ok = true;
        match &parsed {
            Macho::Single(image) => {
                println!("{}: match {} file", file.base_filename(), class_name(image.class()).red());
                self.print_image(image, "  ");
            }
            Macho::Fat(entries) => {
                println!(
                    "{}: match {} file, {} archs",
                    file.base_filename(),
                    "fat".red(),
                    entries.len()
                );
                for (i, entry) in entries.iter().enumerate() {
                    let cpu = get_machocputype(entry.arch.cputype);
                    match &entry.image {
                        Ok(image) => {
                            println!("  [{i}] {} at {:#x}", cpu.red(), entry.arch.offset);
                            self.print_image(image, "    ");
                        }
                        Err(err) => {
                            println!("  [{i}] {} {}", cpu, err.to_string().red());
                            ok = false;
                        }
                    }
                }
            }
        }

        drop(parsed);
        file.release();
        Ok(ok)
    }

    fn run(&self) -> Result<bool> {
        let mut ok = true;
        for path in &self.files {
            ok &= self.scan_file(path)?;
        }
        Ok(ok)
    }
}

fn class_name(class: ArchClass) -> &'static str {
    match class {
        ArchClass::Bits32 => "32-bit Mach-O",
        ArchClass::Bits64 => "64-bit Mach-O",
        ArchClass::Fat => "fat",
        ArchClass::Unknown => "unknown",
    }
}

impl Args {
    fn print_image(&self, image: &MachO<'_>, indent: &str) {
        let order = if image.is_little_endian() { "LE" } else { "BE" };
        println!(
            "{indent}{} {} {} {}",
            class_name(image.class()),
            order,
            get_machocputype(image.header.cputype),
            image.file_type().green()
        );

        let flags: Vec<_> = get_machomhflags(image.header.flags);
        println!("{indent}flags: {}", flags.join(","));

        for segment in image.segments() {
            if segment.is_writable_and_executable() {
                println!("{indent}{} segment {} is W+X", "!".red().bold(), segment.name());
            }
        }

        if self.needed {
            if let Some(dylinker) = image.dylinker() {
                println!("{indent}interp: {}", dylinker.to_string_lossy());
            }
            for lib in image.needed() {
                println!("{indent}needed: {}", lib.to_string_lossy());
            }
            for rpath in image.rpaths() {
                println!("{indent}rpath: {}", rpath.to_string_lossy());
            }
        }

        if self.all {
            for command in &image.commands {
                println!(
                    "{indent}#{:<3} {:<28} {:>6} @ {:#x}{}",
                    command.index,
                    command.name(),
                    command.cmdsize(),
                    command.offset,
                    describe(&command.kind)
                );
            }
        }
    }
}

fn describe(kind: &CommandKind<'_>) -> String {
    match kind {
        CommandKind::Segment(seg) => format!(
            " {} prot {:x}/{:x} {} sections",
            seg.name(),
            seg.initprot,
            seg.maxprot,
            seg.sections.len()
        ),
        CommandKind::Dylib(dylib) => format!(
            " {} ({})",
            dylib.name.to_string_lossy(),
            format_version(dylib.current_version)
        ),
        CommandKind::Dylinker { name } => format!(" {}", name.to_string_lossy()),
        CommandKind::Rpath { path } => format!(" {}", path.to_string_lossy()),
        CommandKind::Uuid(uuid) => format!(
            " {}",
            uuid.iter().map(|b| format!("{b:02x}")).collect::<String>()
        ),
        CommandKind::EncryptionInfo(info) => format!(" cryptid {}", info.cryptid),
        CommandKind::VersionMin { version, sdk } => {
            format!(" {} sdk {}", format_version(*version), format_version(*sdk))
        }
        CommandKind::BuildVersion {
            platform,
            minos,
            sdk,
            ..
        } => format!(
            " platform {} {} sdk {}",
            platform,
            format_version(*minos),
            format_version(*sdk)
        ),
        _ => String::new(),
    }
}
