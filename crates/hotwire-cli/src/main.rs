use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use hotwire_classfile::binary_to_internal;
use hotwire_config::AgentConfig;
use hotwire_proto::{
    AccessorKind, Client, CompileOutcome, Diagnostic, Failure, HotSwapOutcome, HotSwapStatus,
    InstrumentationDirective, InvocationResult, TargetDescriptor,
};
use serde::Serialize;

mod source;

#[derive(Parser)]
#[command(
    name = "hotwire",
    version,
    about = "Drive a hotwire agent: compile, redefine and invoke classes in a running JVM"
)]
struct Cli {
    /// Agent address (defaults to `server.listen` from the config)
    #[arg(long, global = true)]
    connect: Option<String>,
    /// Config file (defaults to `$HOTWIRE_CONFIG`)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Emit JSON instead of human-readable output
    #[arg(long, global = true)]
    json: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Compile Java sources inside the agent without loading them
    Compile(CompileArgs),
    /// Replace a loaded class with a prebuilt class file
    Redefine(RedefineArgs),
    /// Compile sources and swap every produced class into the runtime
    HotSwap(HotSwapArgs),
    /// Call a method and cache the outcome under an offset
    Invoke(InvokeArgs),
    /// Print the cached outcome for an offset
    Result(OffsetArgs),
    /// Drop the cached outcomes for one or more offsets
    Clear(ClearArgs),
}

#[derive(Args)]
struct CompileArgs {
    /// Java source files
    #[arg(required = true)]
    files: Vec<PathBuf>,
    /// Write the produced `.class` files under this directory
    #[arg(long)]
    out: Option<PathBuf>,
}

#[derive(Args)]
struct RedefineArgs {
    /// Class file holding the new definition
    class_file: PathBuf,
    /// Class to redefine (defaults to the name declared by the class file)
    #[arg(long = "class")]
    class_name: Option<String>,
    /// Add an accessor: `field-read:NAME`, `field-write:NAME` or `method-call:NAME[:DESCRIPTOR]`
    #[arg(long = "accessor", value_parser = parse_accessor)]
    accessors: Vec<InstrumentationDirective>,
    /// Route array loads/stores of this class through its array helpers
    #[arg(long)]
    rewrite_arrays: Option<String>,
    /// Which array accesses `--rewrite-arrays` covers
    #[arg(long, value_enum, default_value_t = ArrayAccess::Both)]
    array_access: ArrayAccess,
}

#[derive(Clone, Copy, ValueEnum)]
enum ArrayAccess {
    Reads,
    Writes,
    Both,
}

#[derive(Args)]
struct HotSwapArgs {
    /// Java source files
    #[arg(required = true)]
    files: Vec<PathBuf>,
}

#[derive(Args)]
struct InvokeArgs {
    /// Binary name of the declaring class
    class_name: String,
    /// Method name
    method: String,
    /// Arguments, one JSON value each
    #[arg(allow_negative_numbers = true)]
    args: Vec<String>,
    /// Method descriptor, for overloaded methods
    #[arg(long)]
    descriptor: Option<String>,
    /// Offset to cache the outcome under
    #[arg(long, default_value = "cli")]
    offset: String,
}

#[derive(Args)]
struct OffsetArgs {
    offset: String,
}

#[derive(Args)]
struct ClearArgs {
    #[arg(required = true)]
    offsets: Vec<String>,
}

fn main() {
    let cli = Cli::parse();
    let exit_code = match run(cli) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("{:#}", err);
            2
        }
    };

    std::process::exit(exit_code);
}

fn run(cli: Cli) -> Result<i32> {
    let config = AgentConfig::load(cli.config.as_deref()).context("failed to load config")?;
    hotwire_config::init_tracing(&config.logging);
    let addr = cli.connect.unwrap_or_else(|| config.server.listen.clone());
    let max_frame_bytes = config.server.max_frame_bytes;

    // Read local inputs before connecting so file errors don't depend on the agent.
    let request = Request::prepare(cli.command)?;

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to start the async runtime")?;
    runtime.block_on(async move {
        tracing::debug!(%addr, "connecting to agent");
        let client = Client::connect(addr.as_str())
            .await
            .with_context(|| format!("failed to connect to agent at {addr}"))?;
        let mut client = client.with_max_frame_bytes(max_frame_bytes);
        request.send(&mut client, cli.json).await
    })
}

enum Request {
    Compile {
        units: Vec<hotwire_proto::SourceUnit>,
        out: Option<PathBuf>,
    },
    Redefine {
        class_name: String,
        bytecode: Vec<u8>,
        directives: Vec<InstrumentationDirective>,
    },
    HotSwap {
        units: Vec<hotwire_proto::SourceUnit>,
    },
    Invoke {
        target: TargetDescriptor,
        offset: String,
    },
    Result {
        offset: String,
    },
    Clear {
        offsets: Vec<String>,
    },
}

impl Request {
    fn prepare(command: Command) -> Result<Self> {
        Ok(match command {
            Command::Compile(args) => Request::Compile {
                units: read_sources(&args.files)?,
                out: args.out,
            },
            Command::Redefine(args) => {
                let bytecode = std::fs::read(&args.class_file)
                    .with_context(|| format!("failed to read {}", args.class_file.display()))?;
                let class_name = match args.class_name {
                    Some(name) => name,
                    None => source::class_file_name(&bytecode)
                        .with_context(|| format!("in {}", args.class_file.display()))?,
                };
                let mut directives = args.accessors;
                if let Some(owner) = args.rewrite_arrays {
                    let (reads, writes) = match args.array_access {
                        ArrayAccess::Reads => (true, false),
                        ArrayAccess::Writes => (false, true),
                        ArrayAccess::Both => (true, true),
                    };
                    directives.push(InstrumentationDirective::RewriteArrayAccess {
                        owner,
                        reads,
                        writes,
                    });
                }
                Request::Redefine {
                    class_name,
                    bytecode,
                    directives,
                }
            }
            Command::HotSwap(args) => Request::HotSwap {
                units: read_sources(&args.files)?,
            },
            Command::Invoke(args) => {
                for (index, arg) in args.args.iter().enumerate() {
                    serde_json::from_str::<serde_json::Value>(arg)
                        .with_context(|| format!("argument {} is not valid JSON: {arg}", index + 1))?;
                }
                Request::Invoke {
                    target: TargetDescriptor {
                        class_name: args.class_name,
                        method: args.method,
                        descriptor: args.descriptor,
                        args: args.args,
                    },
                    offset: args.offset,
                }
            }
            Command::Result(args) => Request::Result {
                offset: args.offset,
            },
            Command::Clear(args) => Request::Clear {
                offsets: args.offsets,
            },
        })
    }

    async fn send(self, client: &mut Client, json: bool) -> Result<i32> {
        match self {
            Request::Compile { units, out } => {
                let outcome = client.compile(units).await?;
                print_output(&outcome, json)?;
                match outcome {
                    CompileOutcome::Compiled(classes) => {
                        if let Some(out) = out {
                            for class in &classes {
                                write_class(&out, &class.class_name, &class.bytecode)?;
                            }
                        }
                        Ok(0)
                    }
                    CompileOutcome::Failed { .. } => Ok(1),
                }
            }
            Request::Redefine {
                class_name,
                bytecode,
                directives,
            } => {
                let resp = client.redefine(class_name, bytecode, directives).await?;
                print_output(&resp, json)?;
                Ok(if resp.result.is_ok() { 0 } else { 1 })
            }
            Request::HotSwap { units } => {
                let outcome = client.hot_swap(units).await?;
                print_output(&outcome, json)?;
                let failed = match &outcome {
                    HotSwapOutcome::CompileFailed { .. } => true,
                    HotSwapOutcome::Applied(results) => results
                        .iter()
                        .any(|r| matches!(r.status, HotSwapStatus::Failed(_))),
                };
                Ok(if failed { 1 } else { 0 })
            }
            Request::Invoke { target, offset } => {
                let resp = client.invoke(target, offset).await?;
                print_output(&resp, json)?;
                Ok(if resp.result.is_success() { 0 } else { 1 })
            }
            Request::Result { offset } => {
                let resp = client.get_result(offset).await?;
                print_output(&resp, json)?;
                Ok(match &resp.result {
                    Some(result) if result.is_success() => 0,
                    _ => 1,
                })
            }
            Request::Clear { offsets } => {
                let resp = client.clear_results(offsets.iter().cloned()).await?;
                if json {
                    print_output(&resp, json)?;
                } else {
                    // The response lists only what was present; report every requested offset.
                    for offset in &offsets {
                        if resp.removed.contains(offset) {
                            println!("{offset}: cleared");
                        } else {
                            println!("{offset}: nothing to clear");
                        }
                    }
                }
                Ok(0)
            }
        }
    }
}

fn read_sources(files: &[PathBuf]) -> Result<Vec<hotwire_proto::SourceUnit>> {
    files
        .iter()
        .map(|path| source::source_unit(path, None))
        .collect()
}

fn write_class(out: &Path, class_name: &str, bytecode: &[u8]) -> Result<()> {
    let path = out.join(format!("{}.class", binary_to_internal(class_name)));
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    std::fs::write(&path, bytecode).with_context(|| format!("failed to write {}", path.display()))
}

fn parse_accessor(text: &str) -> Result<InstrumentationDirective, String> {
    let mut parts = text.splitn(3, ':');
    let kind = match parts.next() {
        Some("field-read") => AccessorKind::FieldRead,
        Some("field-write") => AccessorKind::FieldWrite,
        Some("method-call") => AccessorKind::MethodCall,
        _ => {
            return Err(format!(
                "expected field-read, field-write or method-call before ':' in `{text}`"
            ))
        }
    };
    let name = match parts.next() {
        Some(name) if !name.is_empty() => name.to_string(),
        _ => return Err(format!("missing member name in `{text}`")),
    };
    let descriptor = parts.next().map(str::to_string);
    if descriptor.is_some() && kind != AccessorKind::MethodCall {
        return Err(format!("only method-call accessors take a descriptor: `{text}`"));
    }
    Ok(InstrumentationDirective::AddAccessor {
        kind,
        name,
        descriptor,
    })
}

fn print_output<T: Serialize + 'static>(value: &T, json: bool) -> Result<()> {
    if json {
        let out = serde_json::to_string_pretty(value)?;
        println!("{out}");
        return Ok(());
    }

    // Human output for the response types; anything else falls back to pretty JSON.
    let any = value as &dyn std::any::Any;
    if let Some(outcome) = any.downcast_ref::<CompileOutcome>() {
        match outcome {
            CompileOutcome::Compiled(classes) => {
                for class in classes {
                    println!("compiled {} ({} bytes)", class.class_name, class.bytecode.len());
                }
            }
            CompileOutcome::Failed {
                failure,
                diagnostics,
            } => print_compile_failure(failure, diagnostics),
        }
    } else if let Some(resp) = any.downcast_ref::<hotwire_proto::RedefineResponse>() {
        match &resp.result {
            Ok(()) => println!("redefined {}", resp.class_name),
            Err(failure) => print_failure(&format!("redefining {}", resp.class_name), failure),
        }
    } else if let Some(outcome) = any.downcast_ref::<HotSwapOutcome>() {
        match outcome {
            HotSwapOutcome::CompileFailed {
                failure,
                diagnostics,
            } => print_compile_failure(failure, diagnostics),
            HotSwapOutcome::Applied(results) => {
                for result in results {
                    match &result.status {
                        HotSwapStatus::Redefined => println!("redefined {}", result.class_name),
                        HotSwapStatus::Defined => println!("defined {}", result.class_name),
                        HotSwapStatus::Failed(failure) => {
                            print_failure(&format!("swapping {}", result.class_name), failure)
                        }
                    }
                }
            }
        }
    } else if let Some(resp) = any.downcast_ref::<hotwire_proto::InvokeResponse>() {
        print_invocation(&resp.offset, &resp.result);
    } else if let Some(resp) = any.downcast_ref::<hotwire_proto::GetResultResponse>() {
        match &resp.result {
            Some(result) => print_invocation(&resp.offset, result),
            None => println!("{}: no result", resp.offset),
        }
    } else {
        let out = serde_json::to_string_pretty(value)?;
        println!("{out}");
    }
    Ok(())
}

fn print_invocation(offset: &str, result: &InvocationResult) {
    match result {
        InvocationResult::Returned { rendered, .. } => println!("{offset}: {rendered}"),
        InvocationResult::Failed(failure) => print_failure(offset, failure),
    }
}

fn print_compile_failure(failure: &Failure, diagnostics: &[Diagnostic]) {
    for diagnostic in diagnostics {
        println!("{diagnostic}");
    }
    print_failure("compilation", failure);
}

fn print_failure(context: &str, failure: &Failure) {
    println!("{context} failed: {failure}");
    for frame in &failure.stack {
        println!("    at {frame}");
    }
}
