use clap::Parser;

mod app;
mod cli;
mod config;
mod eid;
mod semantic;
#[cfg(test)]
mod tests;

use app::App;
use config::Config;

fn main() -> anyhow::Result<()> {
    init_logging();

    let args = cli::Args::parse();
    let config = Config::load();
    let mut app = App::open(config)?;

    match args.command {
        cli::Command::Add { content, enrich } => {
            let id = app.add_note(&content)?;
            println!("{id}");

            if enrich {
                let ticket = app.enrich(&id)?;
                log::info!("enrichment {ticket} completed");
            }
        }

        cli::Command::Remove { id } => {
            if app.remove_note(&id)? {
                println!("removed {id}");
            } else {
                println!("note {id} not found");
            }
        }

        cli::Command::Search {
            query,
            limit,
            threshold,
        } => {
            let results = app.search(&query, limit, threshold)?;
            println!("{}", serde_json::to_string_pretty(&results)?);
        }

        cli::Command::Suggest {
            hierarchical,
            clusters,
            min_size,
            apply,
        } => {
            let proposals = app.suggest(hierarchical, clusters, min_size)?;
            if proposals.is_empty() {
                println!("no suggestions (not enough cohesive uncategorized notes)");
                return Ok(());
            }

            println!("{}", serde_json::to_string_pretty(&proposals)?);

            if apply {
                for proposal in &proposals {
                    let message = format!(
                        "Create category '{}' with {} notes?",
                        proposal.title,
                        proposal.member_ids.len()
                    );
                    if inquire::Confirm::new(&message).with_default(true).prompt()? {
                        let id = app.apply_proposal(proposal)?;
                        println!("created {id}");
                    }
                }
            }
        }

        cli::Command::Assign { id, apply } => match app.assign(&id, apply)? {
            Some(hit) => println!("{}", serde_json::to_string_pretty(&hit)?),
            None => println!("no match"),
        },

        cli::Command::Enrich { id } => {
            let ticket = app.enrich(&id)?;
            println!("{ticket}");
        }

        cli::Command::Reindex => {
            let count = app.reindex()?;
            println!("re-embedded {count} notes");
        }

        cli::Command::Status => {
            println!("{}", serde_json::to_string_pretty(&app.status()?)?);
        }
    }

    Ok(())
}

fn init_logging() {
    use tracing_subscriber::EnvFilter;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();
}
