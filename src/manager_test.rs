use media_bus::SourceLocator;

use super::*;
use crate::job::JobState;

#[tokio::test]
async fn test_job_lifecycle() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let config = AppConfig::new(dir.path().join("data"));
    let manager = JobManager::open(&config).await?;

    let source = dir.path().join("notes.txt");
    std::fs::write(&source, b"definitely not a video")?;
    let descriptor = manager.init_job(SourceLocator::file(&source), false).await;

    let job = manager
        .job(&descriptor)
        .await
        .ok_or_else(|| anyhow::anyhow!("job {} not registered", descriptor))?;
    assert!(matches!(job.wait_settled().await, JobState::Error { .. }));
    assert!(std::fs::read_dir(config.processing_dir())?.next().is_none());
    assert!(manager.store().entries().await?.is_empty());

    let unknown = JobDescriptor(Uuid::new_v4());
    assert!(manager.job(&unknown).await.is_none());
    Ok(())
}

#[tokio::test]
async fn test_clear_storage_empties_store() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let config = AppConfig::new(dir.path());
    let manager = JobManager::open(&config).await?;

    let stray = config.storage_dir().join("leftover.mp4");
    std::fs::write(&stray, b"old output")?;
    manager.clear_storage().await?;
    assert!(!stray.exists());
    assert!(config.storage_dir().is_dir());
    Ok(())
}
