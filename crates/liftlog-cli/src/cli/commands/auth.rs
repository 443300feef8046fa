//! Identity command handlers.
//!
//! These delegate to the session state manager; success and failure
//! messages arrive through the notice channel and are printed by the
//! context at the end of the command.

use std::io::{BufRead, Write};

use anyhow::{Context, Result};

use crate::context::AppContext;

pub async fn login(ctx: &AppContext, email: &str, password: Option<String>) -> Result<()> {
    let password = resolve_password(password)?;
    ctx.manager.sign_in(email, &password).await;
    Ok(())
}

pub async fn signup(ctx: &AppContext, email: &str, password: Option<String>) -> Result<()> {
    let password = resolve_password(password)?;
    ctx.manager.sign_up(email, &password).await;
    Ok(())
}

pub async fn logout(ctx: &AppContext) -> Result<()> {
    ctx.manager.sign_out().await;
    println!("Signed out.");
    Ok(())
}

pub async fn guest(ctx: &AppContext) -> Result<()> {
    ctx.manager.login_as_guest().await;
    Ok(())
}

pub fn whoami(ctx: &AppContext) -> Result<()> {
    let snapshot = ctx.manager.snapshot();
    match snapshot.user {
        Some(user) => {
            let kind = if snapshot.is_guest { "guest" } else { "account" };
            match user.email {
                Some(email) => println!("{}  {email}  ({kind})", user.id),
                None => println!("{}  ({kind})", user.id),
            }
        }
        None => println!("Not signed in."),
    }
    Ok(())
}

/// Takes the password from the flag/env when given, otherwise reads one
/// line from stdin.
fn resolve_password(password: Option<String>) -> Result<String> {
    if let Some(password) = password {
        return Ok(password);
    }

    eprint!("Password: ");
    std::io::stderr().flush().ok();

    let mut line = String::new();
    std::io::stdin()
        .lock()
        .read_line(&mut line)
        .context("read password from stdin")?;
    let password = line.trim_end_matches(['\r', '\n']);
    if password.is_empty() {
        anyhow::bail!("Password must not be empty");
    }
    Ok(password.to_string())
}
