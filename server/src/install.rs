use std::io::Write as _;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use base64::{Engine as _, engine::general_purpose::STANDARD};
use clap::Args;
use platform_authn::{start_device_login, wait_for_device_token};
use platform_azure::{
    ApplicationRequest, ArmClient, GraphClient, KeyCredential, RequiredResourceAccess,
    ResourceAccess,
};
use sha2::{Digest, Sha256};
use tracing::info;
use uuid::Uuid;

use crate::config::AppConfig;

// Well-known first-party app ids and delegated permission ids.
const AAD_GRAPH_APP_ID: &str = "00000002-0000-0000-c000-000000000000";
const SIGN_IN_SCOPE_ID: &str = "311a71cc-e848-46a1-bdf8-97ff7156d8e6";
const READ_PROFILES_SCOPE_ID: &str = "cba73afc-7f69-4d86-8450-4978e04ecd1a";
const ARM_APP_ID: &str = "797f4846-ba00-4fd7-ba43-dac1f8f63013";
const ARM_USER_IMPERSONATION_SCOPE_ID: &str = "41094075-9dad-400e-a0bd-54e686782033";

/// Register this deployment in the operator's directory.
#[derive(Args, Debug)]
pub struct InstallCommand {
    /// Azure subscription id used to discover the directory; prompted for
    /// when omitted.
    #[arg(long)]
    subscription: Option<Uuid>,
    /// Base URL this deployment answers on (homepage, identifier and reply URL).
    #[arg(long, default_value = "http://localhost:8080/")]
    reply_url: String,
    /// Where the generated key credential (certificate + key) is written.
    #[arg(long, default_value = ".")]
    out_dir: PathBuf,
}

/// One-shot installer: discover the tenant from a subscription id, sign the
/// operator in with the device-code flow, then (re-)register the application
/// with its required resource access and a fresh key credential.
pub async fn run(config: Arc<AppConfig>, command: InstallCommand) -> Result<()> {
    let http = reqwest::Client::new();
    let arm = ArmClient::new(
        http.clone(),
        config.arm_identifier.clone(),
        config.arm_api_versions.clone(),
    );
    let graph = GraphClient::new(
        http.clone(),
        config.graph_identifier.clone(),
        config.graph_api_version.clone(),
    );

    println!("---------- Cloudpoint installer ----------");
    let subscription = match command.subscription {
        Some(id) => id,
        None => prompt_subscription()?,
    };

    let Some(directory_id) = arm.directory_for_subscription(subscription).await? else {
        bail!("could not discover the directory for subscription {subscription}");
    };
    let directory = directory_id.to_string();
    println!("Subscription {subscription} lives in directory {directory}.");

    let code = start_device_login(&http, &config.provider, &directory, &config.graph_identifier)
        .await
        .context("device login could not be started")?;
    if code.message.is_empty() {
        println!(
            "Open {} in a browser and enter the code {} to sign in.",
            code.verification_uri, code.user_code
        );
    } else {
        println!("{}", code.message);
    }
    println!("Waiting for sign-in ...");
    let tokens = wait_for_device_token(&http, &config.provider, &directory, &code)
        .await
        .context("device login was not completed")?;

    let operator = graph.me(&tokens.access_token).await?;
    println!(
        "Welcome {}! Registering Cloudpoint in your directory now ...",
        operator.display_name.as_deref().unwrap_or("there")
    );

    let host = std::env::var("HOSTNAME").unwrap_or_else(|_| "local".to_string());
    let display_name = format!("Cloudpoint-{host}");
    let key_credential = generate_key_credential(&command.out_dir)?;
    let app = ApplicationRequest {
        object_id: None,
        app_id: None,
        display_name: display_name.clone(),
        homepage: Some(command.reply_url.clone()),
        identifier_uris: vec![command.reply_url.clone()],
        reply_urls: vec![command.reply_url.clone()],
        required_resource_access: required_resource_access(),
        key_credentials: vec![key_credential],
    };

    if let Some(existing) = graph.find_application(&tokens.access_token, &display_name).await? {
        if let Some(object_id) = existing.object_id {
            info!(%object_id, "replacing existing registration");
            graph
                .delete_application(&tokens.access_token, &object_id)
                .await?;
        }
    }
    graph.create_application(&tokens.access_token, &app).await?;
    println!("All done. The key credential was written to {}.", command.out_dir.display());
    Ok(())
}

/// Delegated permissions the app needs: sign-in + profile reads on the AAD
/// Graph, and user impersonation on ARM.
fn required_resource_access() -> Vec<RequiredResourceAccess> {
    vec![
        RequiredResourceAccess {
            resource_app_id: AAD_GRAPH_APP_ID.to_string(),
            resource_access: vec![
                ResourceAccess {
                    id: SIGN_IN_SCOPE_ID.to_string(),
                    access_type: "Scope".to_string(),
                },
                ResourceAccess {
                    id: READ_PROFILES_SCOPE_ID.to_string(),
                    access_type: "Scope".to_string(),
                },
            ],
        },
        RequiredResourceAccess {
            resource_app_id: ARM_APP_ID.to_string(),
            resource_access: vec![ResourceAccess {
                id: ARM_USER_IMPERSONATION_SCOPE_ID.to_string(),
                access_type: "Scope".to_string(),
            }],
        },
    ]
}

/// Self-signed certificate registered as the app's key credential; the
/// certificate and private key are kept on disk for the operator.
fn generate_key_credential(out_dir: &PathBuf) -> Result<KeyCredential> {
    let cert = rcgen::generate_simple_self_signed(vec!["cloudpoint.local".to_string()])
        .context("certificate generation failed")?;
    let der = cert.serialize_der()?;

    std::fs::create_dir_all(out_dir)?;
    std::fs::write(
        out_dir.join("cloudpoint-key-credential.pem"),
        cert.serialize_pem()?,
    )?;
    std::fs::write(
        out_dir.join("cloudpoint-key-credential.key"),
        cert.get_key_pair().serialize_pem(),
    )?;

    Ok(KeyCredential {
        custom_key_identifier: STANDARD.encode(Sha256::digest(&der)),
        key_id: Uuid::new_v4().to_string(),
        credential_type: "AsymmetricX509Cert".to_string(),
        usage: "Verify".to_string(),
        value: STANDARD.encode(&der),
    })
}

fn prompt_subscription() -> Result<Uuid> {
    print!("Enter the Azure subscription id to connect: ");
    std::io::stdout().flush()?;
    let mut line = String::new();
    std::io::stdin().read_line(&mut line)?;
    Uuid::parse_str(line.trim()).context("not a valid subscription id (GUID)")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resource_access_covers_graph_and_arm() {
        let access = required_resource_access();
        assert_eq!(access.len(), 2);
        assert_eq!(access[0].resource_app_id, AAD_GRAPH_APP_ID);
        assert_eq!(access[0].resource_access.len(), 2);
        assert_eq!(access[1].resource_app_id, ARM_APP_ID);
        assert!(access[1]
            .resource_access
            .iter()
            .all(|a| a.access_type == "Scope"));
    }

    #[test]
    fn key_credential_is_self_consistent() {
        let dir = std::env::temp_dir().join(format!("cp-install-{}", Uuid::new_v4()));
        let credential = generate_key_credential(&dir).unwrap();
        assert_eq!(credential.credential_type, "AsymmetricX509Cert");
        assert_eq!(credential.usage, "Verify");
        assert!(dir.join("cloudpoint-key-credential.pem").exists());
        assert!(dir.join("cloudpoint-key-credential.key").exists());
        let der = STANDARD.decode(credential.value).unwrap();
        assert_eq!(
            credential.custom_key_identifier,
            STANDARD.encode(Sha256::digest(&der))
        );
        std::fs::remove_dir_all(dir).ok();
    }
}
