use fieldsync_core::models::Actor;

use crate::commands::common::{normalize_text, open_app, Paths};
use crate::error::CliError;
use crate::session_store::StoredSession;

pub fn run_login(
    actor_id: &str,
    label: Option<&str>,
    token: &str,
    paths: &Paths,
) -> Result<(), CliError> {
    let Some(actor_id) = normalize_text(actor_id) else {
        return Err(CliError::Core(fieldsync_core::Error::InvalidInput(
            "actor id cannot be empty".to_string(),
        )));
    };
    let app = open_app(paths)?;
    let Some(token) = normalize_text(token) else {
        app.session().login_failed(&actor_id, "empty access token");
        return Err(CliError::Core(fieldsync_core::Error::Unauthenticated));
    };

    let label = label.and_then(normalize_text).unwrap_or_else(|| actor_id.clone());
    let actor = Actor::new(actor_id, label);
    paths
        .session_store()
        .save(&StoredSession::new(&actor, &token))?;
    app.session().login(actor.clone(), token);

    println!("Signed in as {} ({})", actor.label, actor.id);
    Ok(())
}

pub fn run_logout(force: bool, paths: &Paths) -> Result<(), CliError> {
    let app = open_app(paths)?;
    let pending = app.engine().status().pending_count;
    if pending > 0 && !force {
        return Err(CliError::UnsyncedChanges(pending));
    }

    let summary = app.session().logout()?;
    paths.session_store().clear()?;
    println!(
        "Signed out; {} unsynced changes discarded",
        summary.discarded_changes
    );
    Ok(())
}

pub fn run_consent(
    subject_id: &str,
    scope: &str,
    revoke: bool,
    paths: &Paths,
) -> Result<(), CliError> {
    let app = open_app(paths)?;
    app.session().record_consent(subject_id, !revoke, scope);
    if revoke {
        println!("Consent revoked for {subject_id} ({scope})");
    } else {
        println!("Consent granted for {subject_id} ({scope})");
    }
    Ok(())
}
