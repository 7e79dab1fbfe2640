//! Streaming stats collection.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::BytesMut;
use futures::StreamExt;
use serde::Deserialize;
use serde_json::json;
use tokio_util::sync::CancellationToken;

use crate::{
    docker::BackendFactory,
    event::{EventBus, EventType},
    types::Instance,
    SandparkResult,
};

use super::Task;

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// Streams daemon stats for an instance and emits `instance stats` per
/// sample.
///
/// Unlike the other probes this task is long-lived: it opens the streaming
/// stats reader once and reads until the instance context cancels. When the
/// stream errors out, the run ends and the scheduler recreates it on the
/// next tick.
pub struct CollectStats {
    broker: Arc<dyn EventBus>,
    factory: Arc<dyn BackendFactory>,
}

/// One NDJSON frame of the daemon's stats feed, reduced to the fields the
/// derivation needs.
#[derive(Debug, Default, Deserialize)]
struct StatsFrame {
    #[serde(default)]
    cpu_stats: CpuStats,
    #[serde(default)]
    precpu_stats: CpuStats,
    #[serde(default)]
    memory_stats: MemoryStats,
}

#[derive(Debug, Default, Deserialize)]
struct CpuStats {
    #[serde(default)]
    cpu_usage: CpuUsage,
    #[serde(default)]
    system_cpu_usage: u64,
    #[serde(default)]
    online_cpus: u64,
}

#[derive(Debug, Default, Deserialize)]
struct CpuUsage {
    #[serde(default)]
    total_usage: u64,
}

#[derive(Debug, Default, Deserialize)]
struct MemoryStats {
    #[serde(default)]
    usage: u64,
    #[serde(default)]
    limit: u64,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl CollectStats {
    /// Creates the task.
    pub fn new(broker: Arc<dyn EventBus>, factory: Arc<dyn BackendFactory>) -> Self {
        Self { broker, factory }
    }

    fn emit_sample(&self, instance: &Instance, frame: &StatsFrame) {
        let cpu_delta = frame
            .cpu_stats
            .cpu_usage
            .total_usage
            .saturating_sub(frame.precpu_stats.cpu_usage.total_usage);
        let system_delta = frame
            .cpu_stats
            .system_cpu_usage
            .saturating_sub(frame.precpu_stats.system_cpu_usage);

        let cpu_percent = if system_delta > 0 {
            (cpu_delta as f64 / system_delta as f64)
                * frame.cpu_stats.online_cpus.max(1) as f64
                * 100.0
        } else {
            0.0
        };

        self.broker.emit(
            EventType::InstanceStats,
            &instance.session_id,
            json!({
                "instance": instance.name,
                "cpu_percent": (cpu_percent * 100.0).round() / 100.0,
                "memory_used": frame.memory_stats.usage,
                "memory_limit": frame.memory_stats.limit,
            }),
        );
    }
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

#[async_trait]
impl Task for CollectStats {
    fn name(&self) -> &'static str {
        "CollectStats"
    }

    fn timeout(&self) -> Option<std::time::Duration> {
        // Long-lived by design: the stream stays open for the instance's
        // whole life.
        None
    }

    async fn run(&self, ctx: CancellationToken, instance: &Instance) -> SandparkResult<()> {
        let client = self.factory.for_session(&instance.session_id).await?;
        let mut stream = client.container_stats(&instance.name).await?;

        let mut buffer = BytesMut::new();
        loop {
            tokio::select! {
                _ = ctx.cancelled() => return Ok(()),
                chunk = stream.next() => {
                    let chunk = match chunk {
                        Some(Result::Ok(chunk)) => chunk,
                        Some(Err(e)) => return Err(e),
                        None => return Ok(()),
                    };

                    buffer.extend_from_slice(&chunk);

                    // Frames arrive newline-delimited but chunk boundaries
                    // are arbitrary.
                    while let Some(pos) = buffer.iter().position(|b| *b == b'\n') {
                        let line = buffer.split_to(pos + 1);
                        if line.iter().all(|b| b.is_ascii_whitespace()) {
                            continue;
                        }

                        match serde_json::from_slice::<StatsFrame>(&line) {
                            Result::Ok(frame) => self.emit_sample(instance, &frame),
                            Err(e) => {
                                tracing::debug!(instance = %instance.name, error = %e, "bad stats frame");
                            }
                        }
                    }
                }
            }
        }
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stats_frame_parses_daemon_shape() -> anyhow::Result<()> {
        let frame: StatsFrame = serde_json::from_str(
            r#"{
                "cpu_stats": {
                    "cpu_usage": { "total_usage": 2000000 },
                    "system_cpu_usage": 100000000,
                    "online_cpus": 2
                },
                "precpu_stats": {
                    "cpu_usage": { "total_usage": 1000000 },
                    "system_cpu_usage": 90000000
                },
                "memory_stats": { "usage": 1048576, "limit": 2147483648 }
            }"#,
        )?;

        assert_eq!(frame.cpu_stats.cpu_usage.total_usage, 2_000_000);
        assert_eq!(frame.precpu_stats.system_cpu_usage, 90_000_000);
        assert_eq!(frame.memory_stats.usage, 1_048_576);
        Ok(())
    }
}
