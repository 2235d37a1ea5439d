mod cms;
mod compose;
mod docker;
mod env_file;
mod error;
mod files;
mod hosts;
mod services;
mod settings;
mod shell;
mod site;

use clap::{ArgAction, Parser, Subcommand};
use dialoguer::console::style;
use dialoguer::theme::ColorfulTheme;
use dialoguer::Confirm;
use docker::Docker;
use error::{MeghError, ProcessErrorDetails};
use serde::Serialize;
use serde_json::json;
use services::{install, Services};
use settings::Settings;
use shell::SystemRunner;
use site::{CreateOptions, Outcome, PhpVersion, SiteManager, SiteType};
use std::io::{self, IsTerminal};
use std::path::PathBuf;
use tabled::settings::Style;
use tabled::{Table, Tabled};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "megh", version, about = "Docker based local development sites")]
struct Cli {
    /// Print a JSON envelope instead of text.
    #[arg(long, global = true)]
    json: bool,
    /// Tool home directory (default: $MEGH_HOME or ~/.megh).
    #[arg(long, global = true)]
    home: Option<PathBuf>,
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create the home directory, global stack and sites root
    Install,
    /// Report docker, the shared containers and networks
    Check,
    /// Start the shared services and every site
    Start,
    /// Stop every site and the shared services
    Stop,
    /// List sites on disk
    List,
    /// Create a new site
    Create {
        name: String,
        #[arg(long = "type", value_enum, default_value_t = SiteType::Php)]
        site_type: SiteType,
        #[arg(long, value_enum, default_value_t = PhpVersion::V7_4)]
        php: PhpVersion,
        /// Add a 127.0.0.1 entry to the hosts file
        #[arg(long)]
        add_host: bool,
        /// WordPress admin username
        #[arg(long)]
        username: Option<String>,
        /// WordPress admin email
        #[arg(long)]
        email: Option<String>,
        /// WordPress admin password
        #[arg(long)]
        password: Option<String>,
    },
    /// Start a site's containers
    Enable { name: String },
    /// Stop a site's containers
    Disable { name: String },
    /// Remove a site, its containers and its database
    Delete {
        name: String,
        #[arg(long, default_value_t = false)]
        yes: bool,
    },
    /// Show resolved paths
    Paths,
}

#[derive(Debug, Serialize)]
struct JsonResult<T: Serialize> {
    ok: bool,
    result: Option<T>,
    error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error_details: Option<ProcessErrorDetails>,
}

struct Context {
    settings: Settings,
    json: bool,
}

#[derive(Tabled)]
struct FieldRow {
    #[tabled(rename = "Field")]
    field: String,
    #[tabled(rename = "Value")]
    value: String,
}

#[derive(Tabled)]
struct CheckRow {
    #[tabled(rename = "Component")]
    name: String,
    #[tabled(rename = "Kind")]
    kind: String,
    #[tabled(rename = "Status")]
    status: String,
}

#[derive(Tabled)]
struct SiteRow {
    #[tabled(rename = "Site")]
    name: String,
    #[tabled(rename = "Type")]
    site_type: String,
    #[tabled(rename = "PHP")]
    php: String,
    #[tabled(rename = "Stack")]
    stack: String,
    #[tabled(rename = "Path")]
    path: String,
}

fn main() -> Result<(), MeghError> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    let json = cli.json;

    let result = Settings::resolve(cli.home.as_deref()).and_then(|settings| {
        let ctx = Context { settings, json };
        let runner = SystemRunner;
        match cli.command {
            Commands::Install => handle_install(&ctx),
            Commands::Check => handle_check(&ctx, &runner),
            Commands::Start => handle_start(&ctx, &runner),
            Commands::Stop => handle_stop(&ctx, &runner),
            Commands::List => handle_list(&ctx, &runner),
            Commands::Create {
                name,
                site_type,
                php,
                add_host,
                username,
                email,
                password,
            } => {
                let options = CreateOptions {
                    site_type,
                    php,
                    add_host,
                    admin_username: username,
                    admin_email: email,
                    admin_password: password,
                };
                handle_create(&ctx, &runner, &name, &options)
            }
            Commands::Enable { name } => handle_enable(&ctx, &runner, &name),
            Commands::Disable { name } => handle_disable(&ctx, &runner, &name),
            Commands::Delete { name, yes } => handle_delete(&ctx, &runner, &name, yes),
            Commands::Paths => handle_paths(&ctx),
        }
    });

    if let Err(err) = result {
        if json {
            let payload = JsonResult::<serde_json::Value> {
                ok: false,
                result: None,
                error: Some(err.to_string()),
                error_details: err.details().cloned(),
            };
            print_json(&payload)?;
        } else {
            eprintln!("{} {err}", style("error:").red().bold());
        }
        std::process::exit(1);
    }
    Ok(())
}

fn init_tracing(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_env("MEGH_LOG").unwrap_or_else(|_| EnvFilter::new(level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .try_init();
}

fn handle_install(ctx: &Context) -> Result<(), MeghError> {
    let report = install(&ctx.settings)?;
    output(ctx, &report, || {
        println!("{}", style("megh installed").bold().green());
        println!("  home:       {}", report.home.display());
        println!("  sites root: {}", report.sites_root.display());
        if report.config_created {
            println!("  {}", style("wrote default config.yaml").dim());
        }
        if report.root_password_generated {
            println!("  {}", style("generated database root password").dim());
        }
        println!("Run `megh start` to bring up the shared services.");
    })
}

fn handle_check(ctx: &Context, runner: &SystemRunner) -> Result<(), MeghError> {
    let docker_installed = which::which("docker").is_ok();
    let docker = Docker::new(runner, &ctx.settings);
    let status = Services::new(&docker, &ctx.settings).status(docker_installed)?;
    output(ctx, &status, || {
        let mut rows = vec![
            CheckRow {
                name: "docker".to_string(),
                kind: "binary".to_string(),
                status: yes_no(status.docker_installed, "installed", "not installed"),
            },
            CheckRow {
                name: "docker".to_string(),
                kind: "daemon".to_string(),
                status: yes_no(status.daemon_reachable, "running", "not running"),
            },
        ];
        for component in &status.components {
            let (ok, missing) = if component.kind == "network" {
                ("exists", "missing")
            } else {
                ("running", "not running")
            };
            rows.push(CheckRow {
                name: component.name.clone(),
                kind: component.kind.clone(),
                status: yes_no(component.ok, ok, missing),
            });
        }
        println!("{}", render_table(&rows));
    })
}

fn handle_start(ctx: &Context, runner: &SystemRunner) -> Result<(), MeghError> {
    let docker = Docker::new(runner, &ctx.settings);
    docker.ensure_daemon()?;
    let services = Services::new(&docker, &ctx.settings);
    services.start_networks()?;
    services.start()?;

    let sites = SiteManager::new(runner, &ctx.settings);
    let names = services.sites()?;
    let mut warnings = Vec::new();
    for name in &names {
        collect_site_warnings(name, sites.enable(name), &mut warnings);
    }
    output(
        ctx,
        &json!({ "started": true, "sites": names, "warnings": warnings }),
        || {
            println!("{}", style("Shared services started").green());
            for name in &names {
                println!("  enabled {name}");
            }
            print_warnings(&warnings);
        },
    )
}

fn handle_stop(ctx: &Context, runner: &SystemRunner) -> Result<(), MeghError> {
    let docker = Docker::new(runner, &ctx.settings);
    docker.ensure_daemon()?;
    let services = Services::new(&docker, &ctx.settings);
    let sites = SiteManager::new(runner, &ctx.settings);
    let names = services.sites()?;
    let mut warnings = Vec::new();
    for name in &names {
        collect_site_warnings(name, sites.disable(name), &mut warnings);
    }
    services.stop()?;
    services.stop_networks()?;
    output(
        ctx,
        &json!({ "stopped": true, "sites": names, "warnings": warnings }),
        || {
            for name in &names {
                println!("  disabled {name}");
            }
            println!("{}", style("Shared services stopped").green());
            print_warnings(&warnings);
        },
    )
}

fn collect_site_warnings(name: &str, result: Result<Outcome, MeghError>, warnings: &mut Vec<String>) {
    match result {
        Ok(outcome) => warnings.extend(outcome.warnings().iter().cloned()),
        Err(err) => warnings.push(format!("{name}: {err}")),
    }
}

fn handle_list(ctx: &Context, runner: &SystemRunner) -> Result<(), MeghError> {
    let listed = SiteManager::new(runner, &ctx.settings).list()?;
    output(ctx, &listed, || {
        if listed.is_empty() {
            println!(
                "{}",
                style(format!("No sites in {}", ctx.settings.sites_root.display())).dim()
            );
            return;
        }
        let rows: Vec<SiteRow> = listed
            .iter()
            .map(|s| SiteRow {
                name: s.name.clone(),
                site_type: s.site_type.clone().unwrap_or_else(|| "-".to_string()),
                php: s.php_version.clone().unwrap_or_else(|| "-".to_string()),
                stack: yes_no(s.has_stack, "yes", "no"),
                path: s.path.display().to_string(),
            })
            .collect();
        println!("{}", render_table(&rows));
    })
}

fn handle_create(
    ctx: &Context,
    runner: &SystemRunner,
    name: &str,
    options: &CreateOptions,
) -> Result<(), MeghError> {
    let report = SiteManager::new(runner, &ctx.settings).create(name, options)?;
    output(ctx, &report, || {
        println!(
            "{} {} ({})",
            style("Created").bold().green(),
            report.name,
            report.site_type.as_str()
        );
        println!("  path: {}", report.site_dir.display());
        println!("  url:  {}", report.url);
        if let Some(database) = &report.database {
            println!("  database: {database}");
        }
        if report.host_added {
            println!("  added {} to {}", report.name, ctx.settings.hosts_file.display());
        }
        if let Some(admin) = &report.admin {
            println!("{}", style("WordPress admin").bold());
            let rows = vec![
                FieldRow {
                    field: "URL".to_string(),
                    value: format!("{}/wp-admin", admin.url),
                },
                FieldRow {
                    field: "Username".to_string(),
                    value: admin.username.clone(),
                },
                FieldRow {
                    field: "Password".to_string(),
                    value: admin.password.clone(),
                },
                FieldRow {
                    field: "Email".to_string(),
                    value: admin.email.clone(),
                },
            ];
            println!("{}", render_table(&rows));
        }
        print_warnings(&report.warnings);
    })
}

fn handle_enable(ctx: &Context, runner: &SystemRunner, name: &str) -> Result<(), MeghError> {
    let outcome = SiteManager::new(runner, &ctx.settings).enable(name)?;
    report_outcome(ctx, name, "enabled", &outcome)
}

fn handle_disable(ctx: &Context, runner: &SystemRunner, name: &str) -> Result<(), MeghError> {
    let outcome = SiteManager::new(runner, &ctx.settings).disable(name)?;
    report_outcome(ctx, name, "disabled", &outcome)
}

fn handle_delete(
    ctx: &Context,
    runner: &SystemRunner,
    name: &str,
    yes: bool,
) -> Result<(), MeghError> {
    if !yes {
        if ctx.json || !io::stdin().is_terminal() {
            return Err(MeghError::Precondition(format!(
                "refusing to delete {name} without confirmation; re-run with --yes"
            )));
        }
        let confirmed = Confirm::with_theme(&ColorfulTheme::default())
            .with_prompt(format!(
                "Delete {name}, its containers, database and files?"
            ))
            .default(false)
            .interact()?;
        if !confirmed {
            println!("{}", style("Aborted.").dim());
            return Ok(());
        }
    }
    let outcome = SiteManager::new(runner, &ctx.settings).delete(name)?;
    report_outcome(ctx, name, "deleted", &outcome)
}

fn handle_paths(ctx: &Context) -> Result<(), MeghError> {
    let settings = &ctx.settings;
    let config_path = settings.config_path();
    let payload = json!({
        "home": settings.home,
        "config_path": config_path,
        "config_exists": config_path.exists(),
        "global_stack_file": settings.global_stack_file(),
        "global_env_file": settings.global_env_file(),
        "sites_root": settings.sites_root,
        "hosts_file": settings.hosts_file,
    });
    output(ctx, &payload, || {
        let rows = vec![
            FieldRow {
                field: "home".to_string(),
                value: settings.home.display().to_string(),
            },
            FieldRow {
                field: "config".to_string(),
                value: config_path.display().to_string(),
            },
            FieldRow {
                field: "sites root".to_string(),
                value: settings.sites_root.display().to_string(),
            },
            FieldRow {
                field: "hosts file".to_string(),
                value: settings.hosts_file.display().to_string(),
            },
        ];
        println!("{}", render_table(&rows));
    })
}

fn report_outcome(ctx: &Context, name: &str, verb: &str, outcome: &Outcome) -> Result<(), MeghError> {
    let warnings = outcome.warnings();
    output(
        ctx,
        &json!({ "site": name, "action": verb, "degraded": !warnings.is_empty(), "warnings": warnings }),
        || {
            if warnings.is_empty() {
                println!("{} {name}", style(format!("Site {verb}:")).green());
            } else {
                println!("{} {name}", style(format!("Site {verb} with warnings:")).yellow());
                print_warnings(warnings);
            }
        },
    )
}

fn yes_no(value: bool, yes: &str, no: &str) -> String {
    if value { yes } else { no }.to_string()
}

fn print_warnings(warnings: &[String]) {
    for warning in warnings {
        println!("{} {warning}", style("warning:").yellow());
    }
}

fn render_table<R: Tabled>(rows: &[R]) -> String {
    Table::new(rows).with(Style::rounded()).to_string()
}

fn output<T: Serialize>(ctx: &Context, payload: &T, human: impl FnOnce()) -> Result<(), MeghError> {
    if ctx.json {
        let wrapper = JsonResult {
            ok: true,
            result: Some(payload),
            error: None,
            error_details: None,
        };
        print_json(&wrapper)?;
    } else {
        human();
    }
    Ok(())
}

fn print_json<T: Serialize>(payload: &T) -> Result<(), MeghError> {
    let text = serde_json::to_string_pretty(payload)?;
    println!("{}", text);
    Ok(())
}
