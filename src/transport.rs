//! Byte-stream transport seam.
//!
//! The core is unaware of the underlying network or IPC mechanism; anything
//! `Read + Write` carries Txs. Header-level corruption is fatal to the
//! connection, body-level malformation rejects only the offending Tx.

use std::io::{Read, Write};
use std::sync::Arc;

use crate::core::Limits;
use crate::tx::{decode_tx, encode_tx, TxError, TxHandle, TxMsg, TxPool};

/// Tx-granular transport contract consumed by the protocol core.
pub trait Transport: Send {
    fn send_tx(&mut self, tx: &TxMsg) -> Result<(), TxError>;
    /// `Ok(None)` means the peer closed the stream cleanly.
    fn recv_tx(&mut self) -> Result<Option<TxHandle>, TxError>;
    fn close(&mut self) -> Result<(), TxError>;
}

/// Tx framing over any duplex byte stream.
pub struct StreamTransport<R, W> {
    reader: R,
    writer: W,
    pool: Arc<TxPool>,
    limits: Limits,
    closed: bool,
}

impl<R: Read, W: Write> StreamTransport<R, W> {
    pub fn new(reader: R, writer: W, pool: Arc<TxPool>, limits: Limits) -> Self {
        Self {
            reader,
            writer,
            pool,
            limits,
            closed: false,
        }
    }
}

impl<R: Read + Send, W: Write + Send> Transport for StreamTransport<R, W> {
    fn send_tx(&mut self, tx: &TxMsg) -> Result<(), TxError> {
        if self.closed {
            return Err(TxError::Io(std::io::Error::new(
                std::io::ErrorKind::NotConnected,
                "transport closed",
            )));
        }
        let wire = encode_tx(tx, &self.limits)?;
        self.writer.write_all(&wire)?;
        self.writer.flush()?;
        Ok(())
    }

    fn recv_tx(&mut self) -> Result<Option<TxHandle>, TxError> {
        if self.closed {
            return Ok(None);
        }
        decode_tx(&mut self.reader, &self.pool, &self.limits)
    }

    fn close(&mut self) -> Result<(), TxError> {
        if !self.closed {
            self.closed = true;
            self.writer.flush()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    use crate::core::{SeriesIndex, TagId};
    use crate::tx::{OpCode, TxOp, TxStatus};

    #[test]
    fn sent_txs_arrive_in_order_until_eof() {
        let limits = Limits::default();
        let pool = TxPool::new(&limits);

        let mut wire = Vec::new();
        {
            let mut out =
                StreamTransport::new(Cursor::new(Vec::new()), &mut wire, Arc::clone(&pool), limits.clone());
            for i in 0..3u64 {
                let mut tx = pool.acquire();
                let mut op = TxOp::new(
                    OpCode::UpsertAttr,
                    TagId::from_literal("cell"),
                    TagId::from_literal("attr").attr_uid(),
                );
                op.series = SeriesIndex::from(i);
                op.len = 1;
                tx.data.push(i as u8);
                tx.ops.push(op);
                tx.info.status = TxStatus::Synced;
                tx.info.op_count = 1;
                out.send_tx(&tx).unwrap();
            }
        }

        let mut input = StreamTransport::new(
            Cursor::new(wire),
            Vec::new(),
            Arc::clone(&pool),
            limits,
        );
        for i in 0..3u64 {
            let tx = input.recv_tx().unwrap().expect("tx");
            assert_eq!(tx.ops[0].series, SeriesIndex::from(i));
            assert_eq!(tx.data, vec![i as u8]);
        }
        assert!(input.recv_tx().unwrap().is_none(), "clean eof");
    }
}
