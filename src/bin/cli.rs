use clap::{App, Arg, ArgMatches, SubCommand};
use hugeattach::{
    attach::ProvisionalConfig,
    config::{DEFAULT_CONFIG_PATH, DEFAULT_HUGEPAGE_INFO_PATH, DEFAULT_PAGEMAP_PATH},
    segments::HugepageTableFile,
    AttachConfig, AttachError, Bootstrap, PhysAddrResolver, Result,
};

fn path_args<'a, 'b>() -> Vec<Arg<'a, 'b>> {
    vec![
        Arg::with_name("config")
            .short("c")
            .long("config")
            .value_name("FILE")
            .help("Shared config file written by the primary")
            .default_value(DEFAULT_CONFIG_PATH)
            .takes_value(true),
        Arg::with_name("hugepages")
            .short("p")
            .long("hugepages")
            .value_name("FILE")
            .help("Hugepage table written by the primary")
            .default_value(DEFAULT_HUGEPAGE_INFO_PATH)
            .takes_value(true),
        Arg::with_name("pagemap")
            .long("pagemap")
            .value_name("FILE")
            .help("Kernel page-table export")
            .default_value(DEFAULT_PAGEMAP_PATH)
            .takes_value(true),
    ]
}

fn attach_config(matches: &ArgMatches) -> AttachConfig {
    let mut config = AttachConfig::new();
    if let Some(path) = matches.value_of("config") {
        config = config.with_config_path(path);
    }
    if let Some(path) = matches.value_of("hugepages") {
        config = config.with_hugepage_path(path);
    }
    if let Some(path) = matches.value_of("pagemap") {
        config = config.with_pagemap_path(path);
    }
    config
}

fn parse_address(raw: &str) -> Result<usize> {
    let trimmed = raw.trim_start_matches("0x").trim_start_matches("0X");
    usize::from_str_radix(trimmed, 16)
        .map_err(|_| AttachError::invalid_parameter("address", format!("not a hex address: {}", raw)))
}

fn main() -> Result<()> {
    env_logger::init();

    let matches = App::new("hugeattach-cli")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Rebuild a primary process's hugepage layout in this process")
        .subcommand(
            SubCommand::with_name("attach")
                .about("Reconstruct the shared config and every segment")
                .args(&path_args()),
        )
        .subcommand(
            SubCommand::with_name("inspect")
                .about("Print the shared config and hugepage table without remapping")
                .args(&path_args()),
        )
        .subcommand(
            SubCommand::with_name("virt2phys")
                .about("Translate a virtual address of this process")
                .args(&path_args())
                .arg(
                    Arg::with_name("address")
                        .help("Virtual address in hex")
                        .required(true)
                        .index(1),
                ),
        )
        .get_matches();

    match matches.subcommand() {
        ("attach", Some(sub)) => run_attach(sub),
        ("inspect", Some(sub)) => run_inspect(sub),
        ("virt2phys", Some(sub)) => run_virt2phys(sub),
        _ => {
            println!("Use --help for usage information");
            Ok(())
        }
    }
}

fn run_attach(matches: &ArgMatches) -> Result<()> {
    let mut bootstrap = Bootstrap::new(attach_config(matches));
    let memory = match bootstrap.run() {
        Ok(memory) => memory,
        Err(e) => {
            eprintln!("Attach failed in state {}: {}", bootstrap.state(), e);
            return Err(e);
        }
    };

    println!("Shared config at {:#x}", memory.shared().addr());
    for seg in memory.segments() {
        let desc = seg.descriptor();
        println!(
            "  segment {:3}: {:#x}-{:#x} ({} hugepages of {:#x}, socket {})",
            desc.index,
            desc.virt_addr,
            desc.end(),
            seg.hugepage_count(),
            desc.page_size,
            desc.socket_id
        );
    }
    println!("Total mapped: {:#x} bytes", memory.total_mapped());

    match memory.virt_to_phys(memory.shared().addr()) {
        Ok(phys) => println!("Shared config physical address: {:#x}", phys),
        Err(e) => println!("Physical addresses unavailable: {}", e),
    }
    Ok(())
}

fn run_inspect(matches: &ArgMatches) -> Result<()> {
    let config = attach_config(matches);
    let provisional = ProvisionalConfig::attach(&config.config_path)?;
    let mem_config = provisional.config();

    println!("Config: {}", provisional.path().display());
    println!("  ready:        {}", provisional.is_ready());
    println!("  self address: {:#x}", mem_config.self_address());
    println!("  segments:     {}", mem_config.segment_count());
    for desc in mem_config.segments() {
        println!(
            "    [{:3}] {:#x}-{:#x} phys {:#x} page {:#x} socket {}",
            desc.index,
            desc.virt_addr,
            desc.end(),
            desc.phys_addr,
            desc.page_size,
            desc.socket_id
        );
    }

    let table_file = HugepageTableFile::open(&config.hugepage_path)?;
    let table = table_file.table();
    println!("Hugepage table: {} ({} records)", config.hugepage_path.display(), table.len());
    for entry in table.entries() {
        println!(
            "    seg {:3} file {:4} {:#x} size {:#x} -> {}",
            entry.memseg_id,
            entry.file_id,
            entry.final_va,
            entry.size,
            entry.path.display()
        );
    }
    Ok(())
}

fn run_virt2phys(matches: &ArgMatches) -> Result<()> {
    let config = attach_config(matches);
    let address = parse_address(matches.value_of("address").unwrap_or_default())?;
    let resolver = PhysAddrResolver::new(config.pagemap_path);

    let phys = resolver.virt_to_phys(address)?;
    println!("{:#x} -> {:#x}", address, phys);
    Ok(())
}
