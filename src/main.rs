//! smxboot - boot image composer and programming-script compiler
//!
//! Turns a declarative YAML document into addressed binary payloads and a
//! device-programming command table. The heavy lifting lives in
//! `smxboot-core`; this binary only parses, resolves, and prints or writes
//! the results. No device I/O happens here.

mod cli;

use std::path::Path;

use clap::Parser;
use cli::{Cli, Commands, DEFAULT_CHIPS};
use smxboot_core::util::fmt_size;
use smxboot_core::{CommandKind, Document};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logger
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    // Set log level based on verbosity
    match cli.verbose {
        0 => {} // default (info)
        1 => log::set_max_level(log::LevelFilter::Debug),
        _ => log::set_max_level(log::LevelFilter::Trace),
    }

    let chips: Vec<&str> = if cli.chip_list.is_empty() {
        DEFAULT_CHIPS.to_vec()
    } else {
        cli.chip_list.iter().map(String::as_str).collect()
    };

    match cli.command {
        Commands::Info { file } => run_info(&file, &chips),
        Commands::Compile {
            file,
            script,
            budget,
        } => run_compile(&file, script.as_deref(), budget, &chips),
        Commands::Export { file, output } => run_export(&file, &output, &chips),
    }
}

fn run_info(file: &Path, chips: &[&str]) -> Result<(), Box<dyn std::error::Error>> {
    let doc = Document::open(file, chips)?;

    println!("Document:  {}", doc.name());
    if !doc.description().is_empty() {
        println!("About:     {}", doc.description());
    }
    println!("Platform:  {}", doc.platform());
    println!();

    println!("Segments:");
    for segment in doc.segments().iter() {
        let source = segment.path().unwrap_or("<inline>");
        match segment.address() {
            Some(addr) => println!(
                "  {:24} 0x{:08X}  {}",
                segment.full_name(),
                addr,
                source
            ),
            None => println!("  {:24} {:10}  {}", segment.full_name(), "", source),
        }
    }
    println!();

    println!("Scripts:");
    for script in doc.scripts() {
        println!("  {:24} {}", script.name(), script.description());
    }
    Ok(())
}

fn run_compile(
    file: &Path,
    script_name: Option<&str>,
    budget: u64,
    chips: &[&str],
) -> Result<(), Box<dyn std::error::Error>> {
    let mut doc = Document::open(file, chips)?;
    doc.load()?;

    let script = match script_name {
        Some(name) => doc.script(name, budget)?,
        None => doc.script_at(0, budget)?,
    };

    println!("Script: {} ({})", script.name(), script.description());
    println!();
    for (i, cmd) in script.cmds().iter().enumerate() {
        let tag = match cmd.kind {
            CommandKind::SkipDcd => "sdcd",
            CommandKind::JumpRun => "jrun",
            CommandKind::WriteRegister => "wreg",
            CommandKind::WriteDcd => "wdcd",
            CommandKind::WriteImage => "wimg",
        };
        println!(
            "  {:2}. {:4} [{:>6}] {}",
            i,
            tag,
            cmd.progress_weight,
            cmd.description
        );
    }
    Ok(())
}

fn run_export(
    file: &Path,
    output: &Path,
    chips: &[&str],
) -> Result<(), Box<dyn std::error::Error>> {
    let mut doc = Document::open(file, chips)?;
    doc.load()?;

    std::fs::create_dir_all(output)?;
    for segment in doc.segments().iter() {
        let data = match segment.data() {
            Some(data) => data,
            None => continue,
        };
        let path = output.join(format!(
            "{}.{}.bin",
            segment.name().to_lowercase(),
            segment.kind().tag()
        ));
        std::fs::write(&path, data)?;
        log::info!("wrote {} ({})", path.display(), fmt_size(data.len()));
    }
    Ok(())
}
