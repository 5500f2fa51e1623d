//! Redis broker backend.
//!
//! # Key layout
//!
//! Every key for a queue lives under `{prefix}:{queue}`:
//!
//! - `:id`: counter handing out job ids
//! - `:{id}`: job hash (`name`, `data`, `opts`, `timestamp`, `delay`,
//!   `processedOn`, `finishedOn`, `attemptsMade`, `returnvalue`, `failedReason`)
//! - `:wait`: list of waiting ids, newest on the left
//! - `:active`: list of claimed ids
//! - `:paused`: list of ids held while the queue is paused
//! - `:meta`: hash, `paused` is present while the queue is paused
//! - `:delayed`: sorted set of ids scored by due time (ms)
//! - `:completed` / `:failed`: sorted sets scored by finish time (ms)
//! - `:events`: stream of lifecycle events (`event`, `payload` fields)
//!
//! Every state transition that touches more than one key runs as a Lua
//! script so it is atomic on the server.

use std::collections::HashMap;
use std::sync::LazyLock;
use std::time::Duration;

use chrono::{DateTime, Utc};
use queue_core::{Job, JobCounts, JobEvent, JobId, JobOptions, JobState};
use redis::AsyncCommands;
use redis::aio::ConnectionLike;
use redis::streams::{StreamRangeReply, StreamReadOptions, StreamReadReply};

use crate::error::BrokerError;
use crate::queue::{EVENT_READ_COUNT, EVENT_STREAM_MAX_LEN, EventRecord};

/// Stream id that sorts before every entry.
pub(crate) const STREAM_START: &str = "0-0";

static ADD_JOB: LazyLock<redis::Script> = LazyLock::new(|| {
    redis::Script::new(
        r#"
        redis.call('HSET', KEYS[1], 'name', ARGV[2], 'data', ARGV[3], 'opts', ARGV[4],
            'timestamp', ARGV[5], 'delay', ARGV[6], 'attemptsMade', 0)
        if tonumber(ARGV[6]) > 0 then
            redis.call('ZADD', KEYS[5], ARGV[7], ARGV[1])
        elseif redis.call('HEXISTS', KEYS[4], 'paused') == 1 then
            redis.call('LPUSH', KEYS[3], ARGV[1])
        else
            redis.call('LPUSH', KEYS[2], ARGV[1])
        end
        redis.call('XADD', KEYS[6], 'MAXLEN', '~', ARGV[10], '*',
            'event', ARGV[8], 'payload', ARGV[9])
        return ARGV[1]
        "#,
    )
});

static ACTIVATE_JOB: LazyLock<redis::Script> = LazyLock::new(|| {
    redis::Script::new(
        r#"
        if redis.call('EXISTS', KEYS[1]) == 0 then
            redis.call('LREM', KEYS[2], -1, ARGV[1])
            return false
        end
        redis.call('HSET', KEYS[1], 'processedOn', ARGV[2])
        redis.call('HINCRBY', KEYS[1], 'attemptsMade', 1)
        redis.call('XADD', KEYS[3], 'MAXLEN', '~', ARGV[4], '*',
            'event', 'active', 'payload', ARGV[3])
        return redis.call('HGETALL', KEYS[1])
        "#,
    )
});

static FINISH_JOB: LazyLock<redis::Script> = LazyLock::new(|| {
    redis::Script::new(
        r#"
        if redis.call('EXISTS', KEYS[1]) == 0 then
            return -1
        end
        redis.call('LREM', KEYS[2], -1, ARGV[1])
        redis.call('ZADD', KEYS[3], ARGV[2], ARGV[1])
        redis.call('HSET', KEYS[1], 'finishedOn', ARGV[2], ARGV[3], ARGV[4])
        local excess = redis.call('ZCARD', KEYS[3]) - tonumber(ARGV[5])
        if excess > 0 then
            local stale = redis.call('ZRANGE', KEYS[3], 0, excess - 1)
            for _, id in ipairs(stale) do
                redis.call('DEL', ARGV[9] .. id)
            end
            redis.call('ZREMRANGEBYRANK', KEYS[3], 0, excess - 1)
        end
        redis.call('XADD', KEYS[4], 'MAXLEN', '~', ARGV[8], '*',
            'event', ARGV[6], 'payload', ARGV[7])
        return 0
        "#,
    )
});

static PROMOTE_DELAYED: LazyLock<redis::Script> = LazyLock::new(|| {
    redis::Script::new(
        r#"
        local due = redis.call('ZRANGEBYSCORE', KEYS[1], '-inf', ARGV[1], 'LIMIT', 0, 1000)
        if #due == 0 then
            return 0
        end
        local target = KEYS[2]
        if redis.call('HEXISTS', KEYS[4], 'paused') == 1 then
            target = KEYS[3]
        end
        for _, id in ipairs(due) do
            redis.call('ZREM', KEYS[1], id)
            redis.call('LPUSH', target, id)
        end
        return #due
        "#,
    )
});

static SET_PAUSED: LazyLock<redis::Script> = LazyLock::new(|| {
    redis::Script::new(
        r#"
        local paused = redis.call('HEXISTS', KEYS[1], 'paused') == 1
        local want = ARGV[1] == '1'
        if paused == want then
            return 0
        end
        if want then
            redis.call('HSET', KEYS[1], 'paused', 1)
        else
            redis.call('HDEL', KEYS[1], 'paused')
        end
        while redis.call('RPOPLPUSH', KEYS[2], KEYS[3]) do end
        redis.call('XADD', KEYS[4], 'MAXLEN', '~', ARGV[4], '*',
            'event', ARGV[2], 'payload', ARGV[3])
        return 1
        "#,
    )
});

/// Redis key names for one queue.
#[derive(Debug, Clone)]
pub(crate) struct KeySet {
    base: String,
}

impl KeySet {
    pub(crate) fn new(prefix: &str, queue: &str) -> Self {
        Self {
            base: format!("{}:{}", prefix, queue),
        }
    }

    fn key(&self, suffix: &str) -> String {
        format!("{}:{}", self.base, suffix)
    }

    /// Prefix of every job hash key; the job id is appended.
    fn job_prefix(&self) -> String {
        format!("{}:", self.base)
    }

    fn job(&self, id: &JobId) -> String {
        self.key(id.as_str())
    }

    fn id(&self) -> String {
        self.key("id")
    }

    fn wait(&self) -> String {
        self.key("wait")
    }

    fn active(&self) -> String {
        self.key("active")
    }

    fn paused(&self) -> String {
        self.key("paused")
    }

    fn meta(&self) -> String {
        self.key("meta")
    }

    fn delayed(&self) -> String {
        self.key("delayed")
    }

    fn completed(&self) -> String {
        self.key("completed")
    }

    fn failed(&self) -> String {
        self.key("failed")
    }

    pub(crate) fn events(&self) -> String {
        self.key("events")
    }
}

pub(crate) async fn next_id<C>(conn: &mut C, keys: &KeySet) -> Result<JobId, BrokerError>
where
    C: ConnectionLike + Send,
{
    let id: u64 = conn.incr(keys.id(), 1u64).await?;
    Ok(JobId::new(id.to_string()))
}

pub(crate) async fn add<C>(conn: &mut C, keys: &KeySet, job: &Job) -> Result<(), BrokerError>
where
    C: ConnectionLike + Send,
{
    let created_ms = job.created_at.timestamp_millis();
    let delay_ms = job.opts.delay_ms.unwrap_or(0);
    let event = match job.opts.delay_ms {
        Some(delay_ms) => JobEvent::Delayed {
            job_id: job.id.clone(),
            delay_ms,
            timestamp: job.created_at,
        },
        None => JobEvent::Added {
            job_id: job.id.clone(),
            name: job.name.clone(),
            timestamp: job.created_at,
        },
    };

    let _: String = ADD_JOB
        .prepare_invoke()
        .key(keys.job(&job.id))
        .key(keys.wait())
        .key(keys.paused())
        .key(keys.meta())
        .key(keys.delayed())
        .key(keys.events())
        .arg(job.id.as_str())
        .arg(&job.name)
        .arg(serde_json::to_string(&job.data)?)
        .arg(serde_json::to_string(&job.opts)?)
        .arg(created_ms)
        .arg(delay_ms)
        .arg(created_ms + delay_ms as i64)
        .arg(event.kind())
        .arg(serde_json::to_string(&event)?)
        .arg(EVENT_STREAM_MAX_LEN)
        .invoke_async(conn)
        .await?;
    Ok(())
}

pub(crate) async fn counts<C>(conn: &mut C, keys: &KeySet) -> Result<JobCounts, BrokerError>
where
    C: ConnectionLike + Send,
{
    let (waiting, active, completed, failed, delayed, paused): (u64, u64, u64, u64, u64, u64) =
        redis::pipe()
            .atomic()
            .llen(keys.wait())
            .llen(keys.active())
            .zcard(keys.completed())
            .zcard(keys.failed())
            .zcard(keys.delayed())
            .llen(keys.paused())
            .query_async(conn)
            .await?;

    Ok(JobCounts::empty()
        .with(JobState::Waiting, waiting)
        .with(JobState::Active, active)
        .with(JobState::Completed, completed)
        .with(JobState::Failed, failed)
        .with(JobState::Delayed, delayed)
        .with(JobState::Paused, paused))
}

pub(crate) async fn get_job<C>(
    conn: &mut C,
    keys: &KeySet,
    id: &JobId,
) -> Result<Option<Job>, BrokerError>
where
    C: ConnectionLike + Send,
{
    let fields: HashMap<String, String> = conn.hgetall(keys.job(id)).await?;
    if fields.is_empty() {
        return Ok(None);
    }
    decode_job(id, &fields).map(Some)
}

pub(crate) async fn set_paused<C>(
    conn: &mut C,
    keys: &KeySet,
    paused: bool,
) -> Result<bool, BrokerError>
where
    C: ConnectionLike + Send,
{
    let timestamp = Utc::now();
    let (event, from, to) = if paused {
        (JobEvent::Paused { timestamp }, keys.wait(), keys.paused())
    } else {
        (JobEvent::Resumed { timestamp }, keys.paused(), keys.wait())
    };

    let changed: i64 = SET_PAUSED
        .prepare_invoke()
        .key(keys.meta())
        .key(from)
        .key(to)
        .key(keys.events())
        .arg(if paused { "1" } else { "0" })
        .arg(event.kind())
        .arg(serde_json::to_string(&event)?)
        .arg(EVENT_STREAM_MAX_LEN)
        .invoke_async(conn)
        .await?;
    Ok(changed == 1)
}

pub(crate) async fn is_paused<C>(conn: &mut C, keys: &KeySet) -> Result<bool, BrokerError>
where
    C: ConnectionLike + Send,
{
    Ok(conn.hexists(keys.meta(), "paused").await?)
}

pub(crate) async fn promote_delayed<C>(conn: &mut C, keys: &KeySet) -> Result<usize, BrokerError>
where
    C: ConnectionLike + Send,
{
    let promoted: usize = PROMOTE_DELAYED
        .prepare_invoke()
        .key(keys.delayed())
        .key(keys.wait())
        .key(keys.paused())
        .key(keys.meta())
        .arg(Utc::now().timestamp_millis())
        .invoke_async(conn)
        .await?;
    Ok(promoted)
}

/// Move the oldest waiting id to `active`, blocking up to `block`, and
/// mark the job as claimed.
pub(crate) async fn claim<C>(
    conn: &mut C,
    keys: &KeySet,
    block: Duration,
) -> Result<Option<Job>, BrokerError>
where
    C: ConnectionLike + Send,
{
    // BLMOVE treats 0 as "block forever".
    let timeout = block.as_secs_f64().max(0.001);
    let id: Option<String> = redis::cmd("BLMOVE")
        .arg(keys.wait())
        .arg(keys.active())
        .arg("RIGHT")
        .arg("LEFT")
        .arg(timeout)
        .query_async(conn)
        .await?;
    let Some(id) = id.map(JobId::from) else {
        return Ok(None);
    };

    let now = Utc::now();
    let event = JobEvent::Active {
        job_id: id.clone(),
        timestamp: now,
    };
    let fields: Option<HashMap<String, String>> = ACTIVATE_JOB
        .prepare_invoke()
        .key(keys.job(&id))
        .key(keys.active())
        .key(keys.events())
        .arg(id.as_str())
        .arg(now.timestamp_millis())
        .arg(serde_json::to_string(&event)?)
        .arg(EVENT_STREAM_MAX_LEN)
        .invoke_async(conn)
        .await?;

    match fields {
        Some(fields) => decode_job(&id, &fields).map(Some),
        None => {
            tracing::warn!("Dropped claimed job {} with no record", id);
            Ok(None)
        }
    }
}

/// Move a claimed job into `completed` or `failed` and trim the set.
pub(crate) async fn finish<C>(
    conn: &mut C,
    keys: &KeySet,
    job: &Job,
    keep: u32,
    value: String,
    event: &JobEvent,
) -> Result<(), BrokerError>
where
    C: ConnectionLike + Send,
{
    let (target, field) = match event {
        JobEvent::Completed { .. } => (keys.completed(), "returnvalue"),
        _ => (keys.failed(), "failedReason"),
    };

    let status: i64 = FINISH_JOB
        .prepare_invoke()
        .key(keys.job(&job.id))
        .key(keys.active())
        .key(target)
        .key(keys.events())
        .arg(job.id.as_str())
        .arg(event.timestamp().timestamp_millis())
        .arg(field)
        .arg(value)
        .arg(keep)
        .arg(event.kind())
        .arg(serde_json::to_string(event)?)
        .arg(EVENT_STREAM_MAX_LEN)
        .arg(keys.job_prefix())
        .invoke_async(conn)
        .await?;

    if status < 0 {
        return Err(BrokerError::JobNotFound(job.id.clone()));
    }
    Ok(())
}

/// Id of the newest stream entry, or [`STREAM_START`] for an empty stream.
pub(crate) async fn event_tail<C>(conn: &mut C, keys: &KeySet) -> Result<String, BrokerError>
where
    C: ConnectionLike + Send,
{
    let reply: StreamRangeReply = conn.xrevrange_count(keys.events(), "+", "-", 1).await?;
    Ok(reply
        .ids
        .into_iter()
        .next()
        .map(|entry| entry.id)
        .unwrap_or_else(|| STREAM_START.to_string()))
}

pub(crate) async fn read_events<C>(
    conn: &mut C,
    keys: &KeySet,
    after: &str,
    block: Duration,
) -> Result<Vec<EventRecord>, BrokerError>
where
    C: ConnectionLike + Send,
{
    // BLOCK 0 would wait forever.
    let block_ms = (block.as_millis() as usize).max(1);
    let options = StreamReadOptions::default()
        .count(EVENT_READ_COUNT)
        .block(block_ms);
    let reply: Option<StreamReadReply> = conn
        .xread_options(&[keys.events()], &[after], &options)
        .await?;

    let mut records = Vec::new();
    for stream in reply.map(|r| r.keys).unwrap_or_default() {
        for entry in stream.ids {
            let Some(payload) = entry.get::<String>("payload") else {
                tracing::warn!("Skipping event {} without payload", entry.id);
                continue;
            };
            match serde_json::from_str::<JobEvent>(&payload) {
                Ok(event) => records.push(EventRecord {
                    id: entry.id,
                    event,
                }),
                Err(e) => tracing::warn!("Skipping undecodable event {}: {}", entry.id, e),
            }
        }
    }
    Ok(records)
}

fn decode_job(id: &JobId, fields: &HashMap<String, String>) -> Result<Job, BrokerError> {
    let corrupt = |reason: String| BrokerError::Corrupt {
        id: id.clone(),
        reason,
    };
    let required = |name: &str| {
        fields
            .get(name)
            .ok_or_else(|| corrupt(format!("missing field '{}'", name)))
    };
    let millis = |name: &str| -> Result<Option<DateTime<Utc>>, BrokerError> {
        let Some(raw) = fields.get(name) else {
            return Ok(None);
        };
        let ms: i64 = raw
            .parse()
            .map_err(|_| corrupt(format!("field '{}' is not a timestamp", name)))?;
        DateTime::<Utc>::from_timestamp_millis(ms)
            .map(Some)
            .ok_or_else(|| corrupt(format!("field '{}' is out of range", name)))
    };

    let opts: JobOptions = match fields.get("opts") {
        Some(raw) => serde_json::from_str(raw)?,
        None => JobOptions::default(),
    };
    let return_value = fields
        .get("returnvalue")
        .map(|raw| serde_json::from_str(raw))
        .transpose()?;

    Ok(Job {
        id: id.clone(),
        name: required("name")?.clone(),
        data: serde_json::from_str(required("data")?)?,
        opts,
        created_at: millis("timestamp")?.ok_or_else(|| corrupt("missing field 'timestamp'".into()))?,
        processed_at: millis("processedOn")?,
        finished_at: millis("finishedOn")?,
        attempts_made: fields
            .get("attemptsMade")
            .and_then(|raw| raw.parse().ok())
            .unwrap_or(0),
        return_value,
        failed_reason: fields.get("failedReason").cloned(),
    })
}
