use crate::{
    cli::{actions::cancel_on_ctrl_c, prompt::TerminalInteraction},
    eid::{Enrollment, Orchestrator},
};
use anyhow::{Context, Result};
use std::path::Path;
use tracing::error;

fn pinning_recipe(issuer: &str, pin_path: &Path) -> String {
    format!(
        "To enable certificate pinning, run\n\n  \
         echo \\\n    \
         | openssl s_client -connect {issuer}:443 -servername {issuer} 2>/dev/null \\\n    \
         | openssl x509 -noout -pubkey \\\n    \
         | openssl asn1parse -noout -inform PEM -out {}",
        pin_path.display()
    )
}

fn report(enrollment: &Enrollment, issuer: &str, pin_path: &Path) {
    if !enrollment.identity.is_empty() {
        println!("{}", enrollment.identity);
    }
    println!("Configured {}", enrollment.reference.display());
    if !pin_path.is_file() {
        println!("{}", pinning_recipe(issuer, pin_path));
    }
}

/// Record the identity response as the reference of this account.
/// # Errors
/// Returns an error if the configuration is invalid.
pub async fn execute(config: crate::eid::Config) -> Result<u8> {
    let orchestrator = Orchestrator::new(config).context("invalid configuration")?;
    let cancel = cancel_on_ctrl_c();

    match orchestrator.enroll(&TerminalInteraction::new(), &cancel).await {
        Ok(enrollment) => {
            report(
                &enrollment,
                &orchestrator.config().trusted_issuer,
                &orchestrator.trust_store().pin_path(),
            );
            Ok(0)
        }
        Err(e) => {
            error!("enrollment failed ({}): {}", e.kind(), e);
            eprintln!("{}", e.user_message());
            Ok(e.outcome().exit_code())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recipe_targets_issuer_and_pin_path() {
        let recipe = pinning_recipe("www.autentapp.de", Path::new("/home/alice/.eid/authorized_pubkey"));
        assert!(recipe.contains("-connect www.autentapp.de:443"));
        assert!(recipe.ends_with("-out /home/alice/.eid/authorized_pubkey"));
        assert_eq!(recipe.lines().count(), 6);
    }
}
