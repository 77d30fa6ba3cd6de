//! CSV sink for `-R`/`--rtt` output (§6).
//!
//! Header: `type,timestamp,connection_id,query_id,poisson_id,poisson_interval_us,rtt_us`.
//! `Q` rows are emitted when a query is sent, `A` rows when its
//! response (or, on a reflector, the mirrored message) is matched.
//! Grounded in `original_source/tcpclient.c`'s two `printf` call sites,
//! carried over field-for-field including the empty trailing fields
//! each row type doesn't use.

use crate::common::Wall;
use tokio::io::{AsyncWrite, AsyncWriteExt, BufWriter};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

/// One CSV row, pre-timestamped by the caller so the writer task never
/// has to touch a clock.
pub enum CsvRow {
    Query {
        wall: Wall,
        connection_id: u32,
        query_id: u16,
        poisson_id: u32,
        poisson_interval_us: u64,
    },
    Answer {
        wall: Wall,
        connection_id: u32,
        query_id: u16,
        rtt_us: u64,
    },
}

impl CsvRow {
    fn to_line(&self) -> String {
        match self {
            CsvRow::Query { wall, connection_id, query_id, poisson_id, poisson_interval_us } => {
                format!(
                    "Q,{},{},{},{},{},\n",
                    wall.to_csv_field(),
                    connection_id,
                    query_id,
                    poisson_id,
                    poisson_interval_us
                )
            }
            CsvRow::Answer { wall, connection_id, query_id, rtt_us } => {
                format!(
                    "A,{},{},{},,,{}\n",
                    wall.to_csv_field(),
                    connection_id,
                    query_id,
                    rtt_us
                )
            }
        }
    }
}

pub type CsvSender = UnboundedSender<CsvRow>;

/// Spawns the single task that owns the output stream and serializes
/// every row onto it, in arrival order. `None` sinks are dropped
/// without formatting, for runs without `-R`.
pub fn spawn_sink<W>(writer: W) -> CsvSender
where
    W: AsyncWrite + Unpin + 'static,
{
    let (tx, mut rx): (CsvSender, UnboundedReceiver<CsvRow>) = mpsc::unbounded_channel();
    tokio::task::spawn_local(async move {
        let mut out = BufWriter::new(writer);
        let _ = out.write_all(HEADER.as_bytes()).await;
        while let Some(row) = rx.recv().await {
            if out.write_all(row.to_line().as_bytes()).await.is_err() {
                break;
            }
            let _ = out.flush().await;
        }
    });
    tx
}

const HEADER: &str = "type,timestamp,connection_id,query_id,poisson_id,poisson_interval_us,rtt_us\n";

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::Wall;

    #[test]
    fn query_row_has_empty_rtt_field() {
        let row = CsvRow::Query {
            wall: Wall::from_parts(1, 2),
            connection_id: 3,
            query_id: 4,
            poisson_id: 5,
            poisson_interval_us: 6,
        };
        assert_eq!(row.to_line(), "Q,1.000000002,3,4,5,6,\n");
    }

    #[test]
    fn answer_row_has_empty_poisson_fields() {
        let row = CsvRow::Answer {
            wall: Wall::from_parts(1, 2),
            connection_id: 3,
            query_id: 4,
            rtt_us: 500,
        };
        assert_eq!(row.to_line(), "A,1.000000002,3,4,,,500\n");
    }
}
