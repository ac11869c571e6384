mod cli;
mod ops;

use anyhow::Result;
use clap::Parser;

use cli::{Cli, Commands};

fn main() {
    let cli = Cli::parse();
    dbsnap::logging::init(cli.verbose);

    if let Err(err) = run(cli) {
        eprintln!("Error: {}", err);
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<()> {
    // Commands that don't touch the snapshot store.
    let command = match cli.command {
        Commands::Version => {
            ops::do_version();
            return Ok(());
        }
        Commands::Register {
            name,
            engine,
            container,
            image,
            user,
            password,
            database,
            port,
        } => {
            let info = dbsnap::ServiceInfo {
                name,
                engine,
                container,
                image,
                user,
                password,
                database,
                host_port: port,
            };
            return ops::do_register(&dbsnap::ServiceRegistry::open_default()?, info);
        }
        other => other,
    };

    let svc = ops::open_service(cli.root)?;

    match command {
        Commands::Create {
            service,
            tag,
            note,
            compression,
        } => {
            ops::do_create(&svc, &service, tag, note, compression)?;
        }
        Commands::Restore {
            service,
            tag,
            latest,
            before,
            force,
        } => {
            ops::do_restore(&svc, &service, tag, latest, before, force)?;
        }
        Commands::List { service } => {
            ops::do_list(&svc, service.as_deref())?;
        }
        Commands::Search { query } => {
            ops::do_search(&svc, &query)?;
        }
        Commands::Prune {
            service,
            keep,
            dry_run,
        } => {
            ops::do_prune(&svc, &service, keep, dry_run)?;
        }
        Commands::Verify { service, tag } => {
            ops::do_verify(&svc, &service, tag)?;
        }
        Commands::Delete { service, tag } => {
            ops::do_delete(&svc, &service, &tag)?;
        }
        Commands::Repack {
            service,
            compression,
            tag,
        } => {
            ops::do_repack(&svc, &service, &compression, tag)?;
        }
        Commands::Services => {
            ops::do_services(&svc)?;
        }
        Commands::Version | Commands::Register { .. } => {}
    }

    Ok(())
}
