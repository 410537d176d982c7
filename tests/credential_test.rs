use anyhow::Result;
use cms_monit_match::{run, MonitError, RunOptions};
use httpmock::prelude::*;
use serde_json::json;
use tempfile::TempDir;

async fn write_config(temp_dir: &TempDir, server: &MockServer) -> Result<std::path::PathBuf> {
    let config_content = format!(
        "[jobs]\nurl = {}\nkey = host\n\n[status]\nurl = {}\nkey = host\n",
        server.url("/jobs"),
        server.url("/status"),
    );
    let config_path = temp_dir.path().join("match.ini");
    tokio::fs::write(&config_path, config_content).await?;
    Ok(config_path)
}

/// 沒有 token 時，不可發出任何 HTTP 請求
#[tokio::test]
async fn test_missing_token_aborts_before_any_request() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let server = MockServer::start();
    let any_mock = server.mock(|when, then| {
        when.any_request();
        then.status(200).json_body(json!([{"host": "a"}]));
    });
    let config_path = write_config(&temp_dir, &server).await?;

    let err = run(&RunOptions::new(&config_path), |_| None)
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        MonitError::MissingCredentialError { ref var } if var == "CERN_BEARER_TOKEN"
    ));
    assert_eq!(err.exit_code(), 3);
    any_mock.assert_hits(0);
    Ok(())
}

#[tokio::test]
async fn test_blank_token_is_missing() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let server = MockServer::start();
    let any_mock = server.mock(|when, then| {
        when.any_request();
        then.status(200).json_body(json!([{"host": "a"}]));
    });
    let config_path = write_config(&temp_dir, &server).await?;

    let err = run(&RunOptions::new(&config_path), |_| Some("  ".to_string()))
        .await
        .unwrap_err();

    assert!(matches!(err, MonitError::MissingCredentialError { .. }));
    any_mock.assert_hits(0);
    Ok(())
}

#[tokio::test]
async fn test_bad_config_is_reported_before_credential() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let config_path = temp_dir.path().join("match.ini");
    tokio::fs::write(&config_path, "[only]\nurl = http://localhost/x\nkey = host\n").await?;

    let err = run(&RunOptions::new(&config_path), |_| None)
        .await
        .unwrap_err();

    assert!(matches!(err, MonitError::ConfigError { .. }));
    assert_eq!(err.exit_code(), 2);
    Ok(())
}
