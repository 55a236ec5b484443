use std::{collections::BTreeSet, sync::Arc};

use {
    anyhow::{Context, Result},
    clap::Subcommand,
    lectern_config::{LecternConfig, discover_and_load, resolve_instance, tokens_dir},
    lectern_oauth::{
        AutoRefreshTokenSource, Error as OAuthError, FileTokenStore, FlowConfig, FlowMode,
        OAuthFlow, TokenStore, open_token_store,
    },
    tokio_util::sync::CancellationToken,
    tracing::{info, warn},
};

#[derive(Subcommand)]
pub enum AuthAction {
    /// Log in to an LMS instance via OAuth.
    Login {
        /// Instance name from the config file. Defaults to `default_instance`.
        #[arg(long)]
        instance: Option<String>,
        /// Flow mode: auto, local or oob (overrides config value).
        #[arg(long)]
        mode: Option<FlowMode>,
        /// Local callback port (overrides config value).
        #[arg(long)]
        port: Option<u16>,
    },
    /// Remove the stored token for an instance.
    Logout {
        #[arg(long)]
        instance: Option<String>,
    },
    /// Show authentication status for one or all instances.
    Status {
        #[arg(long)]
        instance: Option<String>,
    },
    /// Print a valid access token, refreshing it if needed.
    Token {
        #[arg(long)]
        instance: Option<String>,
    },
}

pub async fn handle_auth(action: AuthAction) -> Result<()> {
    let config = discover_and_load();
    match action {
        AuthAction::Login {
            instance,
            mode,
            port,
        } => login(&config, instance.as_deref(), mode, port).await,
        AuthAction::Logout { instance } => logout(&config, instance.as_deref()),
        AuthAction::Status { instance } => status(&config, instance.as_deref()).await,
        AuthAction::Token { instance } => token(&config, instance.as_deref()).await,
    }
}

fn store(config: &LecternConfig) -> Result<Arc<dyn TokenStore>> {
    Ok(Arc::from(open_token_store(config.auth.storage, tokens_dir()?)))
}

fn flow_for(config: &LecternConfig, name: Option<&str>) -> Result<(String, OAuthFlow)> {
    let instance = resolve_instance(config, name)?;
    let flow = OAuthFlow::new(FlowConfig::from_instance(&instance, &config.auth))
        .with_context(|| format!("instance {} is not usable", instance.name))?;
    Ok((instance.name, flow))
}

async fn login(
    config: &LecternConfig,
    name: Option<&str>,
    mode: Option<FlowMode>,
    port: Option<u16>,
) -> Result<()> {
    let instance = resolve_instance(config, name)?;
    let mut flow_config = FlowConfig::from_instance(&instance, &config.auth);
    if let Some(mode) = mode {
        flow_config.mode = mode;
    }
    if port.is_some() {
        flow_config.callback_port = port;
    }
    let flow = OAuthFlow::new(flow_config)?;

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_interrupt.cancel();
        }
    });

    let token = match flow.authenticate(&cancel).await {
        Ok(token) => token,
        Err(OAuthError::Cancelled) => {
            eprintln!("Login cancelled");
            // A paste prompt may still hold stdin; the runtime would wait on it.
            std::process::exit(130);
        },
        Err(e) => return Err(e.into()),
    };
    store(config)?
        .save(&instance.name, &token)
        .context("login succeeded but the token could not be saved")?;

    info!(instance = %instance.name, "logged in");
    eprintln!("Logged in to {} ({})", instance.name, instance.base_url);
    Ok(())
}

fn logout(config: &LecternConfig, name: Option<&str>) -> Result<()> {
    let name = match name {
        Some(n) => n.to_string(),
        None => resolve_instance(config, None)?.name,
    };
    store(config)?.delete(&name)?;
    eprintln!("Logged out of {name}");
    Ok(())
}

async fn status(config: &LecternConfig, name: Option<&str>) -> Result<()> {
    let names: BTreeSet<String> = match name {
        Some(n) => BTreeSet::from([n.to_string()]),
        None => {
            let mut names: BTreeSet<String> = config.instances.keys().cloned().collect();
            match tokens_dir().and_then(|dir| Ok(FileTokenStore::new(dir).list()?)) {
                Ok(stored) => names.extend(stored),
                Err(e) => warn!(error = %e, "could not list stored tokens"),
            }
            names
        },
    };

    if names.is_empty() {
        println!("No instances configured.");
        return Ok(());
    }

    let store = store(config)?;
    for name in names {
        let token = match store.load(&name) {
            Ok(token) => token,
            Err(e) if e.is_not_found() => {
                println!("{name}: not logged in");
                continue;
            },
            Err(e) => {
                println!("{name}: unreadable token ({e})");
                continue;
            },
        };

        let expiry = match token.expiry {
            Some(at) if token.is_expired() => format!("expired at {at}"),
            Some(at) => format!("expires at {at}"),
            None => "no expiry".to_string(),
        };
        let refresh = if token.refresh_token().is_some() {
            "refreshable"
        } else {
            "not refreshable"
        };

        let server = match flow_for(config, Some(&name)) {
            Ok((_, flow)) => match flow.validate_token(Some(&token)).await {
                Ok(true) => "accepted by server",
                Ok(false) => "rejected by server",
                Err(e) => {
                    warn!(instance = %name, error = %e, "token validation failed");
                    "server unreachable"
                },
            },
            Err(_) => "instance not configured",
        };

        println!("{name}: logged in, {expiry}, {refresh}, {server}");
    }
    Ok(())
}

async fn token(config: &LecternConfig, name: Option<&str>) -> Result<()> {
    let (name, flow) = flow_for(config, name)?;
    let store = store(config)?;
    let current = store
        .load(&name)
        .with_context(|| format!("not logged in to {name}; run `lectern auth login`"))?;

    let source = AutoRefreshTokenSource::new(current, Arc::clone(&store), &name, Arc::new(flow));
    println!("{}", source.access_token().await?);
    Ok(())
}
