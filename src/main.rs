mod cache;
mod callback;
mod cli;
mod config;
mod conversation;
mod emby;
mod menu;
mod notify;
mod request;
mod router;
mod tasks;
mod telegram;
mod tmdb;
mod types;
mod util;
mod webhook;
mod workflows;

use std::path::Path;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use clap::Parser;

use crate::cli::{Cli, Command};

const HANDLE_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

fn load_validated_config(path: &Path) -> Result<(menu::MenuTree, config::RuntimeConfig), Box<dyn std::error::Error>> {
    let tree = menu::MenuTree::build(menu::DECLARATIONS)?;
    let runtime = config::RuntimeConfig::load(path, tree.defaults());
    runtime.verify_paths(tree.defaults().map(|(path, _)| path))?;
    Ok((tree, runtime))
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    match cli.command {
        Command::Check { config } => {
            let (tree, _) = load_validated_config(&config)?;
            let leaves = tree.defaults().count();
            println!("menu OK ({leaves} toggles), config OK");
            Ok(())
        }

        Command::Run { config, poster_cache, bind, port } => {
            let settings = config::Settings::from_env()?;
            let (tree, runtime) = load_validated_config(&config)?;

            let http = Arc::new(request::ResilientClient::new(
                settings.http_max_retries,
                1.0,
                30.0,
            ));
            let telegram = telegram::TelegramApi::new(http.clone(), &settings.telegram_token);
            let emby = emby::EmbyClient::new(
                http.clone(),
                &settings.emby_server_url,
                &settings.emby_api_key,
                settings.emby_user_id.clone(),
            );
            let tmdb = tmdb::TmdbClient::new(
                http.clone(),
                settings.tmdb_api_token.clone(),
                &poster_cache,
            );

            let app = Arc::new(router::App {
                settings,
                config: runtime,
                menu: tree,
                codec: callback::CodecRegistry::new(),
                handles: cache::HandleCache::new(cache::HANDLE_TTL),
                pending: conversation::ConversationStore::new(),
                http,
                telegram,
                emby,
                tmdb,
                tasks: tasks::TaskQueue::start(256),
                members: router::MemberCache::new(),
                playback_debounce: notify::Debouncer::standard(),
                geo: notify::GeoCache::new(),
            });

            {
                let app = app.clone();
                thread::spawn(move || loop {
                    thread::sleep(HANDLE_SWEEP_INTERVAL);
                    let evicted = app.handles.sweep();
                    if evicted > 0 {
                        eprintln!("[cache] swept {evicted} expired handles");
                    }
                });
            }
            {
                let app = app.clone();
                thread::spawn(move || telegram::run_poll_loop(app));
            }

            webhook::run_webhook_server(app, &bind, port)
        }
    }
}
