//! Command-line interface for the machkit Mach-O toolkit.
//!
//! Thin dispatcher over the `machkit` library: inspection (`file`, `info`,
//! `list`, `symbols`), artifact generation (`dump`), and editing (`insert`,
//! `edit`, `lipo`).

use clap::{ArgGroup, Parser, Subcommand};
use machkit::dyld::Library;
use machkit::gen::{emit_tbd, HeaderEmitter};
use machkit::macho::constants::{
    arch_name, cpu_type_name, filetype_name, lc_name, LC_LAZY_LOAD_DYLIB, LC_LOAD_DYLIB,
    LC_LOAD_UPWARD_DYLIB, LC_LOAD_WEAK_DYLIB,
};
use machkit::macho::fat::{pack_fat, FileKind, MachFile};
use machkit::macho::Editor;
use machkit::objc;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

#[derive(Parser)]
#[command(name = "machkit")]
#[command(about = "Mach-O binary analysis and editing toolkit")]
struct Cli {
    /// Increase log verbosity (-v info, -vv debug)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Report thin/fat layout and the architectures present
    File {
        file: PathBuf,
    },

    /// Show identity, versions, and platform of one slice
    Info {
        /// Slice index for fat inputs
        #[arg(long, default_value_t = 0)]
        slice: usize,

        /// Also print the virtual-memory map
        #[arg(long)]
        vm: bool,

        file: PathBuf,
    },

    /// Enumerate classes, protocols, linked dylibs, or load commands
    #[command(group = ArgGroup::new("what").required(true).args(["classes", "protocols", "linked", "cmds"]))]
    List {
        #[arg(long)]
        classes: bool,

        #[arg(long)]
        protocols: bool,

        #[arg(long)]
        linked: bool,

        #[arg(long)]
        cmds: bool,

        /// Slice index for fat inputs
        #[arg(long, default_value_t = 0)]
        slice: usize,

        file: PathBuf,
    },

    /// Tabulate imports, exports, the symbol table, or bind actions
    #[command(group = ArgGroup::new("table").required(true).args(["imports", "exports", "symtab", "imp_acts"]))]
    Symbols {
        #[arg(long)]
        imports: bool,

        #[arg(long)]
        exports: bool,

        #[arg(long)]
        symtab: bool,

        /// Raw bind actions with addresses
        #[arg(long = "imp-acts")]
        imp_acts: bool,

        /// Slice index for fat inputs
        #[arg(long, default_value_t = 0)]
        slice: usize,

        file: PathBuf,
    },

    /// Write reconstructed headers or a TBD stub
    #[command(group = ArgGroup::new("artifact").required(true).args(["headers", "tbd"]))]
    Dump {
        /// Reconstruct Objective-C headers
        #[arg(long)]
        headers: bool,

        /// Emit a text-based stub
        #[arg(long)]
        tbd: bool,

        /// Output directory for headers (defaults to the working directory)
        #[arg(long)]
        out: Option<PathBuf>,

        /// Sort declarations instead of keeping binary order
        #[arg(long)]
        sorted: bool,

        /// Slice index for fat inputs
        #[arg(long, default_value_t = 0)]
        slice: usize,

        file: PathBuf,
    },

    /// Insert a dylib-loading command
    Insert {
        /// Which command to fabricate: load, load-weak, lazy-load, load-upward
        #[arg(long)]
        lc: String,

        /// Install name the new command carries
        #[arg(long)]
        payload: String,

        #[arg(long)]
        out: PathBuf,

        file: PathBuf,
    },

    /// Change the install name (LC_ID_DYLIB)
    Edit {
        #[arg(long)]
        iname: String,

        #[arg(long)]
        out: PathBuf,

        file: PathBuf,
    },

    /// Extract a slice from, or build, a fat archive
    #[command(group = ArgGroup::new("mode").required(true).args(["extract", "create"]))]
    Lipo {
        /// Write one architecture's slice as a thin file
        #[arg(long)]
        extract: Option<String>,

        /// Pack the input files into one fat archive
        #[arg(long)]
        create: bool,

        #[arg(long)]
        out: Option<PathBuf>,

        files: Vec<PathBuf>,
    },
}

/// CLI failures split by exit code: usage problems exit 1, file-format and
/// core errors exit 2.
enum CliError {
    Usage(String),
    Core(machkit::Error),
}

impl From<machkit::Error> for CliError {
    fn from(err: machkit::Error) -> Self {
        CliError::Core(err)
    }
}

impl From<std::io::Error> for CliError {
    fn from(err: std::io::Error) -> Self {
        CliError::Core(machkit::Error::Io(err))
    }
}

fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => {
            let _ = err.print();
            return ExitCode::from(1);
        }
    };

    let level = match cli.verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    match run(cli.command) {
        Ok(()) => ExitCode::SUCCESS,
        Err(CliError::Usage(msg)) => {
            eprintln!("error: {}", msg);
            ExitCode::from(1)
        }
        Err(CliError::Core(err)) => {
            eprintln!("error: {}", err);
            ExitCode::from(2)
        }
    }
}

fn run(command: Command) -> Result<(), CliError> {
    match command {
        Command::File { file } => cmd_file(&file),
        Command::Info { slice, vm, file } => cmd_info(&file, slice, vm),
        Command::List {
            classes,
            protocols,
            linked,
            cmds,
            slice,
            file,
        } => cmd_list(&file, slice, classes, protocols, linked, cmds),
        Command::Symbols {
            imports,
            exports,
            symtab,
            imp_acts,
            slice,
            file,
        } => cmd_symbols(&file, slice, imports, exports, symtab, imp_acts),
        Command::Dump {
            headers,
            tbd,
            out,
            sorted,
            slice,
            file,
        } => cmd_dump(&file, slice, headers, tbd, out, sorted),
        Command::Insert {
            lc,
            payload,
            out,
            file,
        } => cmd_insert(&file, &lc, &payload, &out),
        Command::Edit { iname, out, file } => cmd_edit(&file, &iname, &out),
        Command::Lipo {
            extract,
            create,
            out,
            files,
        } => cmd_lipo(extract.as_deref(), create, out, &files),
    }
}

fn load_library(path: &Path, slice_index: usize) -> Result<Library, CliError> {
    let file = MachFile::open(path)?;
    let count = file.slices.len();
    let slice = file
        .slices
        .into_iter()
        .nth(slice_index)
        .ok_or_else(|| CliError::Usage(format!("slice {} out of range ({} present)", slice_index, count)))?;
    Ok(Library::parse(slice)?)
}

fn cmd_file(path: &Path) -> Result<(), CliError> {
    let file = MachFile::open(path)?;
    match file.kind {
        FileKind::Thin => println!("thin: 1 slice"),
        FileKind::Fat => println!("fat: {} slices", file.slices.len()),
    }
    for (i, slice) in file.slices.iter().enumerate() {
        println!(
            "  slice {}: {} (subtype {:#x}) offset {:#x} size {:#x}",
            i,
            cpu_type_name(slice.cpu_type),
            slice.cpu_subtype,
            slice.file_offset,
            slice.len()
        );
    }
    Ok(())
}

fn cmd_info(path: &Path, slice: usize, vm: bool) -> Result<(), CliError> {
    let lib = load_library(path, slice)?;
    if let Some(id) = &lib.id {
        println!("install-name: {}", id.install_name);
    }
    if !lib.name.is_empty() {
        println!("name: {}", lib.name);
    }
    println!("filetype: {}", filetype_name(lib.header.filetype));
    println!("flags: {}", lib.header.flag_names().join(" "));
    if let Some(uuid) = lib.uuid_string() {
        println!("uuid: {}", uuid);
    }
    println!(
        "platform: {} ({})",
        lib.platform,
        machkit::macho::constants::platform_name(lib.platform)
    );
    println!("minos: {}", lib.minos);
    println!("sdk: {}", lib.sdk);
    for rpath in &lib.rpaths {
        println!("rpath: {}", rpath);
    }
    if vm {
        print!("{}", lib.vm.render());
    }
    Ok(())
}

fn cmd_list(
    path: &Path,
    slice: usize,
    classes: bool,
    protocols: bool,
    linked: bool,
    cmds: bool,
) -> Result<(), CliError> {
    let lib = load_library(path, slice)?;
    if classes || protocols {
        let meta = objc::read(&lib)?;
        if classes {
            for class in &meta.classes {
                println!("{}", class.name);
            }
        }
        if protocols {
            for proto in &meta.protocols {
                println!("{}", proto.name);
            }
        }
    }
    if linked {
        for dylib in &lib.linked {
            let marker = if dylib.weak { " (weak)" } else { "" };
            println!("{}{}", dylib.install_name, marker);
        }
    }
    if cmds {
        for (i, lc) in lib.load_commands.iter().enumerate() {
            println!("{:>3}  {:<24} {:>6} bytes", i, lc_name(lc.cmd), lc.cmdsize);
        }
    }
    Ok(())
}

fn cmd_symbols(
    path: &Path,
    slice: usize,
    imports: bool,
    exports: bool,
    symtab: bool,
    imp_acts: bool,
) -> Result<(), CliError> {
    let lib = load_library(path, slice)?;
    if imports {
        for action in lib.all_bind_actions() {
            println!(
                "{:<40} {}",
                action.symbol_name,
                lib.ordinal_name(action.dylib_ordinal)
            );
        }
    }
    if exports {
        for export in &lib.exports {
            match &export.reexport {
                Some(re) => println!(
                    "{:<40} re-export from ordinal {}",
                    export.name, re.ordinal
                ),
                None => println!("{:<40} {:#x}", export.name, export.offset),
            }
        }
    }
    if symtab {
        if let Some(table) = &lib.symbol_table {
            for sym in &table.symbols {
                println!("{:#018x}  {:<4} {}", sym.addr, sym.sect, sym.fullname);
            }
        }
    }
    if imp_acts {
        for action in lib.all_bind_actions() {
            println!(
                "{:#018x}  seg {} + {:#x}  {} <- {}",
                action.addr,
                action.segment_index,
                action.segment_offset,
                action.symbol_name,
                lib.ordinal_name(action.dylib_ordinal)
            );
        }
    }
    Ok(())
}

fn cmd_dump(
    path: &Path,
    slice: usize,
    headers: bool,
    tbd: bool,
    out: Option<PathBuf>,
    sorted: bool,
) -> Result<(), CliError> {
    let lib = load_library(path, slice)?;
    let meta = objc::read(&lib)?;

    if headers {
        let out_dir = out.clone().unwrap_or_else(|| PathBuf::from("."));
        std::fs::create_dir_all(&out_dir).map_err(machkit::Error::Io)?;
        let emitter = HeaderEmitter::new().sorted(sorted);
        let files = emitter.library_headers(&meta);
        let count = files.len();
        for (name, text) in files {
            std::fs::write(out_dir.join(&name), text).map_err(machkit::Error::Io)?;
        }
        println!("wrote {} headers to {}", count, out_dir.display());
    }

    if tbd {
        let stub = emit_tbd(&lib, &meta);
        let stem = if lib.name.is_empty() {
            path.file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_else(|| "out".into())
        } else {
            lib.name.clone()
        };
        let out_path = out.unwrap_or_else(|| PathBuf::from(format!("{}.tbd", stem)));
        std::fs::write(&out_path, stub).map_err(machkit::Error::Io)?;
        println!("wrote {}", out_path.display());
    }

    Ok(())
}

fn require_thin(file: &MachFile, operation: &str) -> Result<(), CliError> {
    if file.kind == FileKind::Fat {
        return Err(CliError::Core(machkit::Error::UnsupportedEdit(format!(
            "{} operates on thin files; extract a slice first",
            operation
        ))));
    }
    Ok(())
}

fn cmd_insert(path: &Path, lc: &str, payload: &str, out: &Path) -> Result<(), CliError> {
    let cmd = match lc {
        "load" => LC_LOAD_DYLIB,
        "load-weak" => LC_LOAD_WEAK_DYLIB,
        "lazy-load" => LC_LAZY_LOAD_DYLIB,
        "load-upward" => LC_LOAD_UPWARD_DYLIB,
        other => {
            return Err(CliError::Usage(format!(
                "unknown load command kind {:?} (expected load, load-weak, lazy-load, load-upward)",
                other
            )))
        }
    };

    let file = MachFile::open(path)?;
    require_thin(&file, "insert")?;
    let mut editor = Editor::new(&file.slices[0]);
    editor.insert_dylib_command(cmd, payload)?;
    std::fs::write(out, editor.finish()).map_err(machkit::Error::Io)?;
    println!("wrote {}", out.display());
    Ok(())
}

fn cmd_edit(path: &Path, iname: &str, out: &Path) -> Result<(), CliError> {
    let file = MachFile::open(path)?;
    require_thin(&file, "edit")?;
    let mut editor = Editor::new(&file.slices[0]);
    editor.set_install_name(iname)?;
    std::fs::write(out, editor.finish()).map_err(machkit::Error::Io)?;
    println!("wrote {}", out.display());
    Ok(())
}

fn cmd_lipo(
    extract: Option<&str>,
    create: bool,
    out: Option<PathBuf>,
    files: &[PathBuf],
) -> Result<(), CliError> {
    if let Some(arch) = extract {
        let [input] = files else {
            return Err(CliError::Usage("--extract takes exactly one input file".into()));
        };
        let file = MachFile::open(input)?;
        let slice = file.slice_for_arch(arch).ok_or_else(|| {
            CliError::Core(machkit::Error::UnsupportedEdit(format!(
                "no {} slice in {}",
                arch,
                input.display()
            )))
        })?;
        let out_path =
            out.unwrap_or_else(|| PathBuf::from(format!("{}.{}", input.display(), arch)));
        std::fs::write(&out_path, &slice.data).map_err(machkit::Error::Io)?;
        println!("wrote {}", out_path.display());
        return Ok(());
    }

    if create {
        if files.len() < 2 {
            return Err(CliError::Usage("--create needs at least two input files".into()));
        }
        let out_path = out.ok_or_else(|| CliError::Usage("--create requires --out".into()))?;
        let mut slices = Vec::with_capacity(files.len());
        for input in files {
            let file = MachFile::open(input)?;
            require_thin(&file, "lipo --create")?;
            slices.extend(file.slices);
        }
        let packed = pack_fat(&slices)?;
        std::fs::write(&out_path, packed).map_err(machkit::Error::Io)?;
        println!(
            "wrote {} ({} slices: {})",
            out_path.display(),
            slices.len(),
            slices
                .iter()
                .map(|s| arch_name(s.cpu_type, s.cpu_subtype))
                .collect::<Vec<_>>()
                .join(", ")
        );
    }

    Ok(())
}
