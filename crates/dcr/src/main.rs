use std::path::PathBuf;
use std::process;
use std::sync::Arc;

use clap::{Parser, Subcommand, ValueEnum};
use dcr_core::entrypoints::{self, Handle, Status};
use dcr_core::{
    Address, DSType, Endianness, FileImageReader, PointerWidth, ReaderConfig, ReaderError, ReaderResult, Target,
};
use dcr_utils::{info, init_logging, init_logging_with_level, warn, LogFormat, LogLevel, LoggingGuard};
use dcr_virtual::{callback, Fixture, FixtureBuilder, InstanceSpec, TypeSpec};

type CliResult<T> = Result<T, Box<dyn std::error::Error>>;

/// Read remote data-contract descriptors from memory images or a simulated
/// address space.
#[derive(Parser, Debug)]
#[command(name = "dcr")]
#[command(version)]
#[command(about = "Read remote data-contract descriptors", long_about = None)]
struct Cli
{
    /// Log level (overrides RUST_LOG)
    #[arg(long, global = true)]
    log_level: Option<LogLevel>,

    /// Log format: pretty or json (overrides DCR_LOG_FORMAT)
    #[arg(long, global = true)]
    log_format: Option<LogFormat>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands
{
    /// Build a descriptor in a simulated address space and read it back
    /// through the handle entrypoints
    Demo
    {
        #[command(flatten)]
        layout: LayoutArgs,
    },
    /// Write a descriptor image to a file for `inspect`
    Fixture
    {
        #[command(flatten)]
        layout: LayoutArgs,
        /// Where to write the flat image
        #[arg(short, long)]
        output: PathBuf,
    },
    /// Read a descriptor from a flat memory image
    Inspect
    {
        /// Image file produced by `fixture` or a memory dump
        #[arg(short, long)]
        image: PathBuf,
        /// Address of the first image byte (hex with 0x, or decimal)
        #[arg(short, long, value_parser = parse_address)]
        base: Address,
        /// Address of the descriptor header (hex with 0x, or decimal)
        #[arg(short, long, value_parser = parse_address)]
        descriptor: Address,
    },
}

#[derive(clap::Args, Debug, Clone, Copy)]
struct LayoutArgs
{
    /// Byte order of the simulated target
    #[arg(long, value_enum, default_value_t = ByteOrder::Little)]
    endianness: ByteOrder,
    /// Pointer size of the simulated target in bytes
    #[arg(long, value_enum, default_value_t = Width::Eight)]
    pointer_size: Width,
}

#[derive(ValueEnum, Debug, Clone, Copy)]
enum ByteOrder
{
    Little,
    Big,
}

#[derive(ValueEnum, Debug, Clone, Copy)]
enum Width
{
    #[value(name = "4")]
    Four,
    #[value(name = "8")]
    Eight,
}

impl LayoutArgs
{
    const fn endianness(self) -> Endianness
    {
        match self.endianness {
            ByteOrder::Little => Endianness::Little,
            ByteOrder::Big => Endianness::Big,
        }
    }

    const fn pointer_width(self) -> PointerWidth
    {
        match self.pointer_size {
            Width::Four => PointerWidth::Four,
            Width::Eight => PointerWidth::Eight,
        }
    }
}

fn main()
{
    let cli = Cli::parse();

    let logging = match (cli.log_level, cli.log_format) {
        (None, None) => init_logging(),
        (level, format) => init_logging_with_level(level.unwrap_or_default(), format.unwrap_or_default()),
    };
    let _guard: LoggingGuard = match logging {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Failed to initialize logging: {e}");
            process::exit(1);
        }
    };

    if let Err(e) = run_command(cli.command) {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}

fn run_command(command: Commands) -> CliResult<()>
{
    match command {
        Commands::Demo { layout } => {
            let fixture = sample_fixture(layout)?;
            info!(descriptor = %fixture.descriptor(), layout = %fixture.layout(), "built sample descriptor");
            run_demo(fixture)
        }
        Commands::Fixture { layout, output } => {
            let fixture = sample_fixture(layout)?;
            let image = fixture.system().flatten().ok_or("fixture has no readable memory")?;
            std::fs::write(&output, &image.bytes)?;
            info!(path = %output.display(), len = image.bytes.len(), "wrote image");

            println!("Image:      {}", output.display());
            println!("Layout:     {}", fixture.layout());
            println!("Base:       {}", image.base);
            println!("Descriptor: {}", fixture.descriptor());
            println!();
            println!(
                "Read it back with: dcr inspect --image {} --base {} --descriptor {}",
                output.display(),
                image.base,
                fixture.descriptor()
            );
            Ok(())
        }
        Commands::Inspect { image, base, descriptor } => {
            let reader = FileImageReader::open(&image, base)?;
            info!(path = %image.display(), %base, len = reader.len(), "opened image");
            let mut target = Target::with_config(ReaderConfig::from_env());
            target.set_reader(Box::new(reader))?;
            target.set_stream(descriptor)?;
            print_target(&target)
        }
    }
}

/// Globals and an instance for every known type, encoded in the target's
/// byte order.
fn sample_fixture(layout: LayoutArgs) -> CliResult<Fixture>
{
    let endianness = layout.endianness();
    let width = layout.pointer_width();
    let encode = |value: u64, size: usize| {
        let mut bytes = vec![0u8; size];
        endianness.encode_uint(value, &mut bytes);
        bytes
    };

    let fixture = FixtureBuilder::new(endianness, width)
        .with_type(TypeSpec::for_ds_type(DSType::Ptr, 1, width.bytes() as u64))
        .with_global(
            DSType::SOSBreakingChangeVersion,
            2,
            encode(3, sample_value_size(DSType::SOSBreakingChangeVersion, width)),
        )
        .with_global(
            DSType::ThreadStore,
            3,
            encode(0x7f00_1000, sample_value_size(DSType::ThreadStore, width)),
        )
        .with_instance(InstanceSpec::new(3, Address::new(0x7f00_1000)))
        .with_pointer_data(Address::new(0x7f00_2000))
        .try_build()?;
    Ok(fixture)
}

/// Blob width `sample_fixture` writes for `ty`
const fn sample_value_size(ty: DSType, width: PointerWidth) -> usize
{
    match ty {
        DSType::SOSBreakingChangeVersion => 4,
        DSType::Ptr | DSType::ThreadStore => width.bytes(),
    }
}

fn run_demo(fixture: Fixture) -> CliResult<()>
{
    let (system, descriptor) = fixture.into_shared();
    let registration = callback::register(Arc::clone(&system));

    let mut handle = Handle::INVALID;
    check("init", entrypoints::init(&mut handle))?;
    let result = demo_session(handle, registration.user_context(), descriptor, system.layout().pointer_width);
    entrypoints::destroy(handle);
    result
}

fn demo_session(handle: Handle, user_context: u64, descriptor: Address, width: PointerWidth) -> CliResult<()>
{
    check(
        "set_reader_func",
        entrypoints::set_reader_func(handle, callback::read_callback, user_context),
    )?;
    check("set_stream", entrypoints::set_stream(handle, descriptor.value()))?;
    println!("Session {handle} reading descriptor at {descriptor}");

    let mut version = 0_i32;
    check(
        "get_breaking_change_version",
        entrypoints::get_breaking_change_version(handle, &mut version),
    )?;
    println!("  breaking-change version: {version}");

    for ty in DSType::ALL {
        let mut raw = [0u8; 8];
        let out = &mut raw[..sample_value_size(ty, width)];
        match entrypoints::get_value(handle, ty as u32, out) {
            Status::Ok => println!("  {:<26} 0x{:016x}", ty.name(), Endianness::native().decode_uint(out)),
            Status::Fail => println!("  {:<26} (no value)", ty.name()),
        }
    }
    Ok(())
}

fn check(call: &str, status: Status) -> CliResult<()>
{
    if status.is_ok() {
        Ok(())
    } else {
        warn!(call, code = status.code(), "entrypoint failed");
        Err(format!("{call} failed with status {}", status.code()).into())
    }
}

fn print_target(target: &Target) -> CliResult<()>
{
    let header = target.header()?;
    println!("Descriptor:");
    println!("  Layout:       {}", header.layout);
    println!("  Flags:        0x{:08x}", header.flags);
    println!("  Payload:      {} ({} bytes)", header.payload_address, header.payload_len);
    println!("  Pointer data: {} entries at {}", header.pointer_data_count, header.pointer_data_address);
    for index in 0..header.pointer_data_count {
        println!("    [{index}] {}", target.pointer_data(index)?);
    }

    let tables = target.tables()?;
    println!("Types:");
    for remote in tables.remote_types() {
        let local = tables.local_type(remote.id).map_or("-", DSType::name);
        println!(
            "  #{:<4} {:<26} v{} size {:<4} local {local}",
            remote.id, remote.name, remote.version, remote.size
        );
    }

    println!("Values:");
    for ty in DSType::ALL {
        match read_blob_value(target, ty) {
            Ok(value) => println!("  {:<26} 0x{value:016x}", ty.name()),
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(e.into()),
        }
        if let Ok(address) = target.instance_address(ty) {
            println!("  {:<26} instance at {address}", ty.name());
        }
    }
    match target.breaking_change_version() {
        Ok(version) => println!("  breaking-change version: {version}"),
        Err(e) if e.is_not_found() => println!("  breaking-change version: (not published)"),
        Err(e) => return Err(e.into()),
    }
    Ok(())
}

/// Decode a blob of whatever integer width the target published
fn read_blob_value(target: &Target, ty: DSType) -> ReaderResult<u64>
{
    let len = target.blob(ty)?.len();
    let mut raw = [0u8; 8];
    let out = raw
        .get_mut(..len)
        .ok_or_else(|| ReaderError::UsageError(format!("{ty} blob is {len} bytes")))?;
    target.get_value(ty, out)?;
    Ok(Endianness::native().decode_uint(out))
}

fn parse_address(raw: &str) -> Result<Address, String>
{
    let parsed = match raw.strip_prefix("0x").or_else(|| raw.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(&hex.replace('_', ""), 16),
        None => raw.replace('_', "").parse(),
    };
    parsed
        .map(Address::new)
        .map_err(|e| format!("invalid address '{raw}': {e}"))
}
