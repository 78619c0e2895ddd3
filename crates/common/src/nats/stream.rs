use crate::nats::StreamAdmin;
use anyhow::{Context, Result};
use async_nats::jetstream::stream::Config as StreamConfig;
use tracing::{debug, info};

/// Subject pattern captured by a stream: every subject one token below its name
pub fn stream_subjects(stream_name: &str) -> String {
    format!("{}.*", stream_name)
}

/// Create `stream_name` unless it already exists. An existing stream is left as-is.
pub async fn ensure_stream(
    admin: &dyn StreamAdmin,
    stream_name: &str,
    description: &str,
) -> Result<()> {
    if admin.stream_exists(stream_name).await? {
        debug!(stream = %stream_name, "stream already exists");
        return Ok(());
    }

    let config = StreamConfig {
        name: stream_name.to_string(),
        subjects: vec![stream_subjects(stream_name)],
        description: Some(description.to_string()),
        ..Default::default()
    };
    admin
        .create_stream(config)
        .await
        .with_context(|| format!("failed to create stream {}", stream_name))?;

    info!(stream = %stream_name, "created stream");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nats::MockStreamAdmin;

    #[tokio::test]
    async fn test_existing_stream_is_left_alone() {
        let mut admin = MockStreamAdmin::new();
        admin
            .expect_stream_exists()
            .withf(|name: &str| name == "device_commands")
            .times(1)
            .returning(|_| Ok(true));
        admin.expect_create_stream().times(0);

        ensure_stream(&admin, "device_commands", "commands").await.unwrap();
    }

    #[tokio::test]
    async fn test_missing_stream_is_created_with_child_subjects() {
        let mut admin = MockStreamAdmin::new();
        admin.expect_stream_exists().returning(|_| Ok(false));
        admin
            .expect_create_stream()
            .withf(|config: &StreamConfig| {
                config.name == "device_responses"
                    && config.subjects == vec!["device_responses.*".to_string()]
                    && config.description.as_deref() == Some("responses")
            })
            .times(1)
            .returning(|_| Ok(()));

        ensure_stream(&admin, "device_responses", "responses").await.unwrap();
    }

    #[tokio::test]
    async fn test_creation_failure_names_the_stream() {
        let mut admin = MockStreamAdmin::new();
        admin.expect_stream_exists().returning(|_| Ok(false));
        admin
            .expect_create_stream()
            .returning(|_| Err(anyhow::anyhow!("insufficient resources")));

        let err = ensure_stream(&admin, "device_commands", "commands")
            .await
            .unwrap_err();

        assert_eq!(err.to_string(), "failed to create stream device_commands");
    }

    #[tokio::test]
    async fn test_lookup_failure_is_propagated() {
        let mut admin = MockStreamAdmin::new();
        admin
            .expect_stream_exists()
            .returning(|_| Err(anyhow::anyhow!("no responders")));
        admin.expect_create_stream().times(0);

        assert!(ensure_stream(&admin, "device_commands", "commands").await.is_err());
    }
}
