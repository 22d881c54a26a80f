use pmp_proxy_gateway::config::Config;
use pmp_proxy_gateway::routes::{register_all, Registration, RouteSurfaces, Services};
use std::env;
use std::process;

fn main() {
    let args: Vec<String> = env::args().collect();

    if args.len() < 2 {
        eprintln!("Usage: pmp-proxy-validate <config-file> [--json]");
        eprintln!("\nExample:");
        eprintln!("  pmp-proxy-validate config.yaml");
        process::exit(1);
    }

    let config_path = &args[1];
    let json = args.iter().any(|a| a == "--json");

    if !json {
        println!("Validating configuration file: {}", config_path);
        println!("{}", "=".repeat(60));
    }

    match validate(config_path) {
        Ok(registration) if json => match serde_json::to_string_pretty(&registration) {
            Ok(text) => println!("{}", text),
            Err(e) => {
                eprintln!("Error: {}", e);
                process::exit(1);
            }
        },
        Ok(registration) => {
            println!("✓ Configuration is valid!\n");
            print_summary(&registration);
            println!("\n{}", "=".repeat(60));
            println!("Configuration validation complete!");
        }
        Err(e) => {
            eprintln!("✗ Configuration is invalid!\n");
            eprintln!("Error: {}", e);

            let message = e.to_string();
            if message.contains("YAML") || message.contains("parsing") {
                eprintln!("\nHint: Check for YAML syntax errors:");
                eprintln!("  - Proper indentation (use spaces, not tabs)");
                eprintln!("  - Missing colons or dashes");
                eprintln!("  - Unclosed quotes");
            } else if message.contains("unknown backend provider") {
                eprintln!("\nHint: Supported providers are rp, reverseproxy, rpc, reverseproxycache and alb.");
            } else if message.contains("only one backend can be marked as default") {
                eprintln!("\nHint: Set is_default on a single backend.");
            }

            eprintln!("\n{}", "=".repeat(60));
            process::exit(1);
        }
    }
}

/// Load the file and run registration in dry-run mode
fn validate(path: &str) -> anyhow::Result<Registration> {
    let config = Config::from_yaml_file(path)?;
    config.validate()?;
    let services = Services::from_config(&config)?;
    let surfaces = RouteSurfaces::new(&config);
    Ok(register_all(&config, &services, &surfaces, true)?)
}

fn print_summary(registration: &Registration) {
    println!("Summary:");
    println!("  - Backends: {}", registration.backends.len());
    println!(
        "  - Default backend: {}",
        registration.default_backend.as_deref().unwrap_or("(none)")
    );

    for backend in &registration.backends {
        println!("\nBackend '{}' ({})", backend.name, backend.provider);
        let origin = if backend.http_client.origin_url.is_empty() {
            "(none)"
        } else {
            backend.http_client.origin_url.as_str()
        };
        println!("  origin: {}", origin);
        println!(
            "  timeout: {} ms, max idle conns: {}",
            backend.http_client.timeout_ms, backend.http_client.max_idle_conns
        );
        for path in &backend.paths {
            println!(
                "  path {:<32} {:?} {} -> {} [{}]",
                path.key,
                path.match_type,
                path.path,
                path.handler,
                path.methods.join(",")
            );
        }
    }
}
