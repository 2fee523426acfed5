use std::io::{BufRead, Write};
use std::sync::Arc;

use vendi_agent::{Adapters, RateLimiter, RequestLogger, SalesAgent};
use vendi_core::config::{AppConfig, LlmProvider, LoadOptions};
use vendi_core::{ModelClient, SessionStore, TurnMetadata};
use vendi_db::{
    connect_with_settings, demo_products, migrations, InMemoryCatalogAdapter,
    InMemoryCustomerAdapter, InMemoryOrderAdapter, InMemoryPaymentAdapter, MemorySessionStore,
    SqlCatalogAdapter, SqlCustomerAdapter, SqlOrderAdapter, SqlPaymentAdapter, SqlSessionStore,
};
use vendi_llm::OllamaClient;

use crate::commands::CommandResult;

pub fn run(
    session: &str,
    message: Option<&str>,
    in_memory: bool,
    persist_sessions: bool,
) -> CommandResult {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => {
            return CommandResult::failure(
                "chat",
                "config_validation",
                format!("configuration issue: {error}"),
                2,
            );
        }
    };

    crate::init_logging(&config);

    let model = match build_model(&config) {
        Ok(model) => model,
        Err(detail) => return CommandResult::failure("chat", "llm_wiring", detail, 3),
    };

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(error) => {
            return CommandResult::failure(
                "chat",
                "runtime_init",
                format!("failed to initialize async runtime: {error}"),
                3,
            );
        }
    };

    runtime.block_on(async {
        let (adapters, store) = match build_backends(&config, in_memory, persist_sessions).await {
            Ok(wiring) => wiring,
            Err((error_class, detail)) => {
                return CommandResult::failure("chat", error_class, detail, 4);
            }
        };

        let agent = SalesAgent::new(&config, model, adapters, store).with_hooks(vec![
            Arc::new(RequestLogger),
            Arc::new(RateLimiter::default()),
        ]);

        match message {
            Some(message) => {
                let response = agent.chat(session, message, TurnMetadata::default()).await;
                println!("{}", response.text);
                CommandResult::silent()
            }
            None => {
                repl(&agent, session).await;
                CommandResult::silent()
            }
        }
    })
}

async fn repl(agent: &SalesAgent, session: &str) {
    println!("vendi chat — type a message, or `exit` to quit");

    let stdin = std::io::stdin();
    loop {
        print!("you> ");
        let _ = std::io::stdout().flush();

        let mut line = String::new();
        match stdin.lock().read_line(&mut line) {
            Ok(0) | Err(_) => break,
            Ok(_) => {}
        }

        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if line == "exit" || line == "quit" {
            break;
        }

        let response = agent.chat(session, line, TurnMetadata::default()).await;
        println!("vendi> {}", response.text);
    }
}

fn build_model(config: &AppConfig) -> Result<Arc<dyn ModelClient>, String> {
    match config.llm.provider {
        LlmProvider::Ollama => OllamaClient::from_config(&config.llm)
            .map(|client| Arc::new(client) as Arc<dyn ModelClient>)
            .map_err(|error| error.to_string()),
        other => Err(format!(
            "llm provider {other:?} is not implemented yet; use the ollama provider or a custom \
             model client"
        )),
    }
}

async fn build_backends(
    config: &AppConfig,
    in_memory: bool,
    persist_sessions: bool,
) -> Result<(Adapters, Arc<dyn SessionStore>), (&'static str, String)> {
    if in_memory {
        if persist_sessions {
            return Err((
                "flag_conflict",
                "--persist-sessions requires the database; drop --in-memory".to_string(),
            ));
        }

        let catalog = Arc::new(InMemoryCatalogAdapter::with_products(demo_products()));
        let orders = Arc::new(InMemoryOrderAdapter::with_catalog(
            config.orders.clone(),
            Arc::clone(&catalog),
        ));
        let payments = Arc::new(InMemoryPaymentAdapter::with_orders(
            config.payments.checkout_base_url.clone(),
            Arc::clone(&orders),
        ));

        let adapters = Adapters::default()
            .with_catalog(catalog)
            .with_orders(orders)
            .with_customers(Arc::new(InMemoryCustomerAdapter::default()))
            .with_payments(payments);
        let store: Arc<dyn SessionStore> =
            Arc::new(MemorySessionStore::new(Some(config.conversation.session_ttl_secs)));
        return Ok((adapters, store));
    }

    let pool = connect_with_settings(
        &config.database.url,
        config.database.max_connections,
        config.database.timeout_secs,
    )
    .await
    .map_err(|error| ("db_connectivity", error.to_string()))?;

    migrations::run_pending(&pool).await.map_err(|error| ("migration", error.to_string()))?;

    let adapters = Adapters::default()
        .with_catalog(Arc::new(SqlCatalogAdapter::new(pool.clone())))
        .with_orders(Arc::new(SqlOrderAdapter::new(pool.clone(), config.orders.clone())))
        .with_customers(Arc::new(SqlCustomerAdapter::new(pool.clone())))
        .with_payments(Arc::new(SqlPaymentAdapter::new(
            pool.clone(),
            config.payments.checkout_base_url.clone(),
        )));

    let store: Arc<dyn SessionStore> = if persist_sessions {
        Arc::new(SqlSessionStore::new(pool))
    } else {
        Arc::new(MemorySessionStore::new(Some(config.conversation.session_ttl_secs)))
    };

    Ok((adapters, store))
}
