use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use mirror_core::Order;
use parking_lot::Mutex;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tracing::{info, warn};

use super::{EventLog, OrderEvent, OrderFilter, OrderStore, StoreError, StoreResult};

/// Append handle plus the length of the file's last complete record.
struct LogWriter {
    file: File,
    committed: u64,
}

impl LogWriter {
    /// Append `buf` as one unit. Bytes left behind by a failed write (this
    /// one or an earlier one) are truncated away, so a later append never
    /// lands on the same line as a fragment.
    async fn append(&mut self, buf: &[u8]) -> StoreResult<()> {
        let actual = self.file.metadata().await?.len();
        if actual != self.committed {
            warn!(committed = self.committed, actual, "[store] discarding partial record");
            self.file.set_len(self.committed).await?;
        }

        if let Err(e) = self.write(buf).await {
            if let Err(rollback) = self.file.set_len(self.committed).await {
                warn!("[store] could not roll back failed write: {rollback}");
            }
            return Err(e.into());
        }
        self.committed += buf.len() as u64;
        Ok(())
    }

    async fn write(&mut self, buf: &[u8]) -> std::io::Result<()> {
        self.file.write_all(buf).await?;
        self.file.flush().await
    }
}

/// Order store persisted as one JSON [`OrderEvent`] per line.
///
/// The file is replayed into memory on open and only ever appended to.
/// A batch is serialized into one buffer and written with a single
/// `write_all` on tokio's blocking pool, then flushed, before it becomes
/// visible to readers. Writers queue on an async lock; readers only touch
/// the in-memory log and never wait for disk.
pub struct FileOrderStore {
    path: PathBuf,
    log: Mutex<EventLog>,
    writer: tokio::sync::Mutex<LogWriter>,
}

impl FileOrderStore {
    /// Open (or create) the log at `path` and replay it.
    ///
    /// An undecodable final line is treated as a torn write and cut off;
    /// an undecodable line anywhere else is an error.
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        let mut log = EventLog::new();
        let mut torn_at = None;
        let mut needs_newline = false;
        if path.exists() {
            let content = std::fs::read_to_string(&path)?;
            let lines: Vec<&str> = content.split_inclusive('\n').collect();
            let last = lines.iter().rposition(|l| !l.trim().is_empty());
            let mut offset = 0;
            for (idx, line) in lines.iter().enumerate() {
                let start = offset;
                offset += line.len();
                if line.trim().is_empty() {
                    continue;
                }
                match serde_json::from_str::<OrderEvent>(line.trim_end()) {
                    Ok(event) => log.append(event),
                    Err(e) if Some(idx) == last => {
                        warn!(path = %path.display(), line = idx + 1, "[store] dropping torn final record: {e}");
                        torn_at = Some(start as u64);
                    }
                    Err(e) => return Err(StoreError::Corrupt { line: idx + 1, reason: e.to_string() }),
                }
            }
            needs_newline = torn_at.is_none() && !content.is_empty() && !content.ends_with('\n');
        }

        let mut file = OpenOptions::new().create(true).append(true).open(&path)?;
        if let Some(len) = torn_at {
            file.set_len(len)?;
        } else if needs_newline {
            file.write_all(b"\n")?;
        }
        let committed = file.metadata()?.len();
        info!(
            path = %path.display(),
            orders = log.len(),
            events = log.event_count(),
            "[store] order log opened"
        );
        Ok(Self {
            path,
            log: Mutex::new(log),
            writer: tokio::sync::Mutex::new(LogWriter { file: File::from_std(file), committed }),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of distinct orders.
    pub fn len(&self) -> usize {
        self.log.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.log.lock().is_empty()
    }

    /// Persist `orders` as one batch, then publish them to the in-memory log.
    /// The caller holds the writer lock, so staged sequence numbers stay valid.
    async fn write_events(&self, writer: &mut LogWriter, orders: Vec<Order>) -> StoreResult<()> {
        let (events, buf) = {
            let log = self.log.lock();
            let events: Vec<OrderEvent> =
                orders.into_iter().enumerate().map(|(i, order)| log.stage(order, i as u64)).collect();
            let mut buf = Vec::new();
            for event in &events {
                serde_json::to_writer(&mut buf, event)?;
                buf.push(b'\n');
            }
            (events, buf)
        };

        writer.append(&buf).await?;

        let mut log = self.log.lock();
        for event in events {
            log.append(event);
        }
        Ok(())
    }
}

#[async_trait]
impl OrderStore for FileOrderStore {
    async fn insert(&self, order: Order) -> StoreResult<()> {
        self.insert_many(vec![order]).await
    }

    async fn insert_many(&self, orders: Vec<Order>) -> StoreResult<()> {
        let mut writer = self.writer.lock().await;
        self.log.lock().check_new(&orders)?;
        self.write_events(&mut writer, orders).await
    }

    async fn update(&self, order: Order) -> StoreResult<()> {
        let mut writer = self.writer.lock().await;
        self.log.lock().check_exists(order.exchange_order_id)?;
        self.write_events(&mut writer, vec![order]).await
    }

    async fn get(&self, exchange_order_id: u64) -> StoreResult<Option<Order>> {
        Ok(self.log.lock().get(exchange_order_id).cloned())
    }

    async fn query(&self, filter: &OrderFilter) -> StoreResult<Vec<Order>> {
        Ok(self.log.lock().query(filter))
    }

    async fn open_instruments(&self) -> StoreResult<Vec<String>> {
        Ok(self.log.lock().open_instruments())
    }

    async fn history(&self, exchange_order_id: u64) -> StoreResult<Vec<OrderEvent>> {
        Ok(self.log.lock().history(exchange_order_id))
    }
}
