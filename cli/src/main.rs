use clap::Parser;
use env_logger::Env;
use myruntime::{init, sandbox, SandboxConfig};

/// Minimal OCI-style container runtime: pulls an image, builds an overlay
/// rootfs, applies cgroup limits, and runs one command in fresh namespaces
/// behind a bridged network.
#[derive(Parser, Debug)]
#[command(name = "myruntime", version, about)]
struct Args {
    /// Image to run (docker/oci reference)
    #[arg(long, default_value = "busybox")]
    image: String,

    /// Command to run inside the container (quoted string, whitespace-split)
    #[arg(long, default_value = "sh")]
    cmd: String,

    /// Container name, scopes the working directory and cgroup
    #[arg(long, default_value = "myctr")]
    name: String,

    /// cgroup v2 cpu.max value (e.g. "100000 100000" or "max")
    #[arg(long)]
    cpu: Option<String>,

    /// cgroup v2 memory.max value (e.g. "100M")
    #[arg(long)]
    memory: Option<String>,

    /// Comma-separated capabilities to grant
    #[arg(long)]
    cap_add: Option<String>,

    /// Comma-separated capabilities to remove
    #[arg(long)]
    cap_drop: Option<String>,

    /// Comma-separated host:container port mappings (e.g. 8080:80,4443:443)
    #[arg(long, value_delimiter = ',')]
    publish: Vec<String>,

    /// Host bridge to attach containers to
    #[arg(long, default_value = "myruntime0")]
    bridge: String,

    /// CIDR of the bridge network, gateway is .1
    #[arg(long, default_value = "172.25.0.0/16")]
    bridge_cidr: String,

    /// Log filter (error, warn, info, debug, trace)
    #[arg(long, default_value = "info")]
    log_level: String,
}

fn main() {
    // the re-exec'd init must win before any argument parsing
    if init::is_child() {
        env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();
        init::main_child();
    }

    let args = Args::parse();
    env_logger::Builder::from_env(Env::default().default_filter_or(args.log_level.as_str()))
        .init();

    let config = SandboxConfig {
        name: args.name,
        image: args.image,
        command: args.cmd,
        cpu_max: args.cpu,
        memory_max: args.memory,
        cap_add: args.cap_add,
        cap_drop: args.cap_drop,
        publish: args.publish,
        bridge: args.bridge,
        bridge_cidr: args.bridge_cidr,
    };

    match sandbox::run(&config) {
        Ok(status) => std::process::exit(status.code()),
        Err(err) => {
            log::error!("{}", err);
            std::process::exit(1);
        }
    }
}
