use crate::netascii::{NetasciiReader, NetasciiWriter};
use crate::packet::{ErrorCode, Packet, TftpOption, TransferMode};
use crate::path::{self, SanitizeError};
use crate::resolver::{FilenameResolver, IdentityResolver};
use sna::SerialNumber;
use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, PartialEq)]
pub enum TftpError {
    /// The transfer is already running and cannot be restarted
    TransferAlreadyRunning,

    /// The received packet type cannot be used to initiate a transfer
    NotInitiatingPacket,
}

/// Trait used to inject filesystem IO handling into a server.
/// A trivial default implementation is provided by `FSAdapter`.
/// If you want to employ things like buffered IO, it can be done by providing
/// an implementation for this trait and passing the implementing type to the server.
pub trait IOAdapter {
    type R: Read + Sized;
    type W: Write + Sized;
    fn open_read(&self, file: &Path, mode: TransferMode) -> io::Result<(Self::R, Option<u64>)>;
    fn create_new(
        &mut self,
        file: &Path,
        mode: TransferMode,
        len: Option<u64>,
    ) -> io::Result<Self::W>;
}

/// Provides a simple, default implementation for `IOAdapter`, translating
/// the file contents through netascii (RFC 764) when the negotiated mode
/// calls for it.
pub struct FSAdapter;

impl IOAdapter for FSAdapter {
    type R = Box<dyn Read + Send>;
    type W = Box<dyn Write + Send>;

    fn open_read(&self, file: &Path, mode: TransferMode) -> io::Result<(Self::R, Option<u64>)> {
        let f = File::open(file)?;
        let len = f.metadata().ok().map(|meta| meta.len());
        match mode {
            // netascii expands CR/LF, so the raw file length is no longer
            // the exact transfer size; omit it rather than report a wrong tsize.
            TransferMode::Netascii => Ok((Box::new(NetasciiReader::new(f)), None)),
            _ => Ok((Box::new(f), len)),
        }
    }

    fn create_new(
        &mut self,
        file: &Path,
        mode: TransferMode,
        len: Option<u64>,
    ) -> io::Result<Self::W> {
        let f = fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(file)?;
        match mode {
            TransferMode::Netascii => Ok(Box::new(NetasciiWriter::new(f))),
            _ => {
                if let Some(l) = len {
                    f.set_len(l)?;
                }
                Ok(Box::new(f))
            }
        }
    }
}

impl Default for FSAdapter {
    fn default() -> Self {
        FSAdapter
    }
}

#[derive(Debug)]
struct TransferMeta {
    blocksize: u16,
    /// Period between retransmits of the last unacknowledged datagram;
    /// a fixed server setting, never negotiated on the wire.
    ack_timeout: Duration,
    /// Inactivity budget: the transfer is abandoned once this much time
    /// passes with no progress-advancing packet received. Defaults to the
    /// server configuration unless the client negotiated RFC 2349 `timeout`.
    max_timeout: Duration,
    /// Time accumulated since the last progress-advancing packet, in units
    /// of `ack_timeout` (one retransmit timer period per `timeout_expired`
    /// call).
    elapsed: Duration,
}

impl TransferMeta {
    fn progressed(&mut self) {
        self.elapsed = Duration::from_secs(0);
    }
}

/// Server-wide defaults used to seed each transfer's timers; not
/// negotiated, just the initial values a transfer starts from.
#[derive(Debug, Clone, Copy)]
pub struct EngineCfg {
    pub ack_timeout: Duration,
    pub timeout: Duration,
}

impl Default for EngineCfg {
    fn default() -> Self {
        Self {
            ack_timeout: Duration::from_millis(500),
            timeout: Duration::from_secs(5),
        }
    }
}

/// The TFTP protocol and filesystem usage implementation,
/// used as backend for a TFTP server
pub struct TftpServerProto<IO: IOAdapter> {
    io_proxy: IOPolicyProxy<IO>,
    engine_cfg: EngineCfg,
    resolver: Arc<dyn FilenameResolver>,
}

#[derive(Debug)]
pub struct Response {
    p: Vec<ResponseItem>,
}

impl Iterator for Response {
    type Item = ResponseItem;
    fn next(&mut self) -> Option<Self::Item> {
        self.p.pop()
    }
}

impl<T> From<T> for Response
where
    T: Into<ResponseItem>,
{
    fn from(r: T) -> Self {
        Self { p: vec![r.into()] }
    }
}
impl From<Vec<ResponseItem>> for Response {
    fn from(mut v: Vec<ResponseItem>) -> Self {
        v.reverse();
        Self { p: v }
    }
}

#[derive(Debug, PartialEq)]
pub enum ResponseItem {
    Packet(Packet),
    Done,
    /// Resend the single last datagram sent on this connection.
    RepeatLast,
}

/// Classifies a filesystem/sanitizer error into the wire error code that
/// should be reported for it, per the error taxonomy: NotFound maps to
/// `FileNotFound`, PermissionDenied (including a sanitizer rejection) maps
/// to `AccessViolation`, and an exclusive-create collision maps to
/// `FileExists`. Anything else is reported as `NotDefined`.
fn io_err_to_code(e: &io::Error) -> ErrorCode {
    match e.kind() {
        io::ErrorKind::NotFound => ErrorCode::FileNotFound,
        io::ErrorKind::PermissionDenied => ErrorCode::AccessViolation,
        io::ErrorKind::AlreadyExists => ErrorCode::FileExists,
        _ => ErrorCode::NotDefined,
    }
}

impl<IO: IOAdapter> TftpServerProto<IO> {
    /// Creates a new instance with the provided IOAdapter
    pub fn new(io: IO, cfg: IOPolicyCfg) -> Self {
        Self::with_engine_cfg(io, cfg, EngineCfg::default())
    }

    /// Creates a new instance with explicit timer defaults and the identity
    /// filename resolver.
    pub fn with_engine_cfg(io: IO, cfg: IOPolicyCfg, engine_cfg: EngineCfg) -> Self {
        Self {
            io_proxy: IOPolicyProxy::new(io, cfg),
            engine_cfg,
            resolver: Arc::new(IdentityResolver),
        }
    }

    /// Installs a pluggable filename resolver, invoked on every RRQ/WRQ
    /// filename before the path sanitizer sees it.
    pub fn with_resolver(mut self, resolver: Arc<dyn FilenameResolver>) -> Self {
        self.resolver = resolver;
        self
    }

    /// Signals the receipt of a transfer-initiating packet (either RRQ or WRQ).
    /// If a `Transfer` is returned in the first tuple member, that must be used to
    /// handle all future packets from the same client via `Transfer::rx`.
    /// If a `Transfer` is not returned, then a transfer cannot be started from the
    /// received packet.
    ///
    /// In both cases the packet contained in the `Result` should be sent back to the client.
    pub fn rx_initial(
        &mut self,
        packet: Packet,
        peer: SocketAddr,
    ) -> (Option<Transfer<IO>>, Result<Packet, TftpError>) {
        let (filename, mode, mut options, is_write) = match packet {
            Packet::RRQ {
                filename,
                mode,
                options,
            } => (filename, mode, options, false),
            Packet::WRQ {
                filename,
                mode,
                options,
            } => (filename, mode, options, true),
            _ => return (None, Err(TftpError::NotInitiatingPacket)),
        };

        match mode {
            TransferMode::Octet | TransferMode::Netascii => {}
            TransferMode::Mail => return (None, Ok(ErrorCode::NoUser.into())),
        }
        let filename = self.resolver.resolve(&filename, peer);
        let file = Path::new(&filename);

        let mut meta = TransferMeta {
            blocksize: 512,
            ack_timeout: self.engine_cfg.ack_timeout,
            max_timeout: self.engine_cfg.timeout,
            elapsed: Duration::from_secs(0),
        };
        let mut transfer_size = None;

        let mut options = options
            .drain(..)
            .filter_map(|opt| {
                match opt {
                    TftpOption::Blocksize(size) => meta.blocksize = size,
                    TftpOption::Timeout(secs) => {
                        meta.max_timeout = Duration::from_secs(u64::from(secs))
                    }
                    TftpOption::TransferSize(size) => {
                        transfer_size = Some(size);
                        if !is_write {
                            // for read take out the transfer size initially, it needs changing
                            return None;
                        }
                    }
                }
                Some(opt)
            })
            .collect::<Vec<_>>();

        let (xfer, packet) = if is_write {
            let fwrite = match self.io_proxy.create_new(file, mode, transfer_size) {
                Ok(f) => f,
                Err(e) => return (None, Ok(io_err_to_code(&e).into())),
            };

            Transfer::<IO>::new_write(fwrite, meta, options)
        } else {
            let (fread, len) = match self.io_proxy.open_read(file, mode) {
                Ok(f) => f,
                Err(e) => return (None, Ok(io_err_to_code(&e).into())),
            };

            if let (Some(_), Some(file_size)) = (transfer_size, len) {
                options.push(TftpOption::TransferSize(file_size));
            }

            Transfer::<IO>::new_read(fread, meta, options)
        };

        (xfer, Ok(packet))
    }
}

/// The state of an ongoing transfer with one client
#[derive(Debug)]
pub enum Transfer<IO: IOAdapter> {
    Rx(TransferRx<IO::W>),
    Tx(TransferTx<IO::R>),
    Complete,
}

#[derive(Debug)]
pub struct TransferRx<W: Write> {
    fwrite: W,
    expected_block: SerialNumber<u16>,
    meta: TransferMeta,
}

#[derive(Debug)]
pub struct TransferTx<R: Read> {
    fread: R,
    expected_block: SerialNumber<u16>,
    sent_final: bool,
    meta: TransferMeta,
}

impl<IO: IOAdapter> Transfer<IO> {
    fn new_read(
        fread: IO::R,
        meta: TransferMeta,
        options: Vec<TftpOption>,
    ) -> (Option<Self>, Packet) {
        let mut xfer = TransferTx {
            fread,
            expected_block: 0.into(),
            sent_final: false,
            meta,
        };

        let packet = if options.is_empty() {
            xfer.read_step()
        } else {
            Ok(Packet::OACK { options })
        };
        match packet {
            Ok(p) => (Some(Transfer::Tx(xfer)), p),
            Err(p) => (None, p),
        }
    }

    fn new_write(
        fwrite: IO::W,
        meta: TransferMeta,
        options: Vec<TftpOption>,
    ) -> (Option<Self>, Packet) {
        let xfer = TransferRx {
            fwrite,
            // block counter numbering starts at 1 (GLOSSARY); the first DATA
            // we expect from the client is block 1.
            expected_block: 1.into(),
            meta,
        };

        let packet = if options.is_empty() {
            Packet::ACK(0)
        } else {
            Packet::OACK { options }
        };
        (Some(Transfer::Rx(xfer)), packet)
    }

    /// Checks to see if the transfer has completed
    pub fn is_done(&self) -> bool {
        match *self {
            Transfer::Complete => true,
            _ => false,
        }
    }

    /// Call this to indicate that the retransmit timer has fired (once per
    /// `retransmit_interval()`). Each firing with no intervening progress
    /// accumulates against the inactivity budget; once that budget is
    /// exhausted the transfer is abandoned rather than retransmitted again.
    pub fn timeout_expired(&mut self) -> ResponseItem {
        let result = match *self {
            Transfer::Rx(TransferRx { ref mut meta, .. })
            | Transfer::Tx(TransferTx { ref mut meta, .. }) => {
                meta.elapsed += meta.ack_timeout;
                if meta.elapsed >= meta.max_timeout {
                    ResponseItem::Done
                } else {
                    ResponseItem::RepeatLast
                }
            }
            Transfer::Complete => ResponseItem::Done,
        };
        if let ResponseItem::Done = result {
            *self = Transfer::Complete;
        };
        result
    }

    /// The period on which the retransmit timer should be scheduled for
    /// this transfer.
    pub fn retransmit_interval(&self) -> Duration {
        match *self {
            Transfer::Rx(TransferRx { ref meta, .. })
            | Transfer::Tx(TransferTx { ref meta, .. }) => meta.ack_timeout,
            Transfer::Complete => Duration::from_millis(500),
        }
    }

    /// Process and consume a received packet.
    /// When the first `ResponseItem::Done` is returned, the transfer is considered complete
    /// and all future calls to rx will also return `ResponseItem::Done`.
    ///
    /// Transfer completion can be checked via `Transfer::is_done()`
    pub fn rx(&mut self, packet: Packet) -> Result<Response, TftpError> {
        if self.is_done() {
            return Ok(ResponseItem::Done.into());
        }
        let result = match (packet, &mut *self) {
            (Packet::ACK(ack_block), &mut Transfer::Tx(ref mut tx)) => Ok(tx.handle_ack(ack_block)),
            (
                Packet::DATA {
                    block_num,
                    ref data,
                },
                &mut Transfer::Rx(ref mut rx),
            ) => Ok(rx.handle_data(block_num, data)),
            (Packet::DATA { .. }, _) | (Packet::ACK(_), _) => {
                // wrong kind of packet, kill transfer
                Ok(vec![
                    ResponseItem::Packet(ErrorCode::IllegalTFTP.into()),
                    ResponseItem::Done,
                ]
                .into())
            }

            (Packet::ERROR { .. }, _) => {
                // receiving an error kills the transfer
                Ok(ResponseItem::Done.into())
            }
            _ => Err(TftpError::TransferAlreadyRunning),
        };

        if let Ok(true) = result.as_ref().map(|r| r.p.contains(&ResponseItem::Done)) {
            *self = Transfer::Complete;
        }
        result
    }
}

impl<R: Read> TransferTx<R> {
    fn handle_ack(&mut self, ack_block: u16) -> Response {
        let ack_block = SerialNumber(ack_block);

        if self.sent_final && ack_block == self.expected_block {
            return ResponseItem::Done.into();
        }

        if ack_block != self.expected_block {
            // duplicate or stale ACK: per the lock-step protocol this produces
            // no state change. The retransmit timer, not the ACK handler, is
            // responsible for resending unacknowledged data.
            return Response { p: vec![] };
        }

        self.meta.progressed();
        match self.read_step() {
            Ok(p) => ResponseItem::Packet(p).into(),
            Err(p) => vec![ResponseItem::Packet(p), ResponseItem::Done].into(),
        }
    }

    fn read_step(&mut self) -> Result<Packet, Packet> {
        let mut v = Vec::with_capacity(self.meta.blocksize as usize);
        if self
            .fread
            .by_ref()
            .take(u64::from(self.meta.blocksize))
            .read_to_end(&mut v)
            .is_err()
        {
            return Err(ErrorCode::NotDefined.into());
        }

        self.sent_final = v.len() < self.meta.blocksize as usize;
        self.expected_block += 1;
        Ok(Packet::DATA {
            block_num: self.expected_block.0,
            data: v,
        })
    }
}

impl<W: Write> TransferRx<W> {
    fn handle_data(&mut self, block: u16, data: &[u8]) -> Response {
        let block = SerialNumber(block);

        if block != self.expected_block {
            // Wrong block number: idempotently re-ACK whatever we last
            // accepted, without writing or advancing state.
            let prev = self.expected_block.0.wrapping_sub(1);
            return ResponseItem::Packet(Packet::ACK(prev)).into();
        }

        self.meta.progressed();
        if self.fwrite.write_all(data).is_err() {
            return vec![
                ResponseItem::Packet(ErrorCode::NotDefined.into()),
                ResponseItem::Done,
            ]
            .into();
        }

        let ack = Packet::ACK(block.0);
        // A short block -- including a zero-length one at the expected
        // block number -- is also treated as the final block and ends
        // the transfer.
        if data.len() < self.meta.blocksize as usize {
            vec![ResponseItem::Packet(ack), ResponseItem::Done].into()
        } else {
            self.expected_block += 1;
            ResponseItem::Packet(ack).into()
        }
    }
}

pub struct IOPolicyCfg {
    pub readonly: bool,
    pub path: Option<PathBuf>,
}

impl Default for IOPolicyCfg {
    fn default() -> Self {
        Self {
            readonly: false,
            path: None,
        }
    }
}

pub(crate) struct IOPolicyProxy<IO: IOAdapter> {
    io: IO,
    policy: IOPolicyCfg,
}

impl<IO: IOAdapter> IOPolicyProxy<IO> {
    pub(crate) fn new(io: IO, cfg: IOPolicyCfg) -> Self {
        Self { io, policy: cfg }
    }

    fn root(&self) -> PathBuf {
        self.policy
            .path
            .clone()
            .unwrap_or_else(|| PathBuf::from("."))
    }

    /// Runs the client-supplied filename through the logical path sanitizer,
    /// confining it under the serving root.
    fn resolve(&self, file: &Path) -> io::Result<PathBuf> {
        let filename = file.to_str().ok_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidInput, "filename is not valid UTF-8")
        })?;
        path::resolve(&self.root(), filename).map_err(sanitize_err_to_io)
    }
}

impl<IO: IOAdapter> IOAdapter for IOPolicyProxy<IO> {
    type R = IO::R;
    type W = IO::W;
    fn open_read(&self, file: &Path, mode: TransferMode) -> io::Result<(Self::R, Option<u64>)> {
        let resolved = self.resolve(file)?;
        let result = self.io.open_read(&resolved, mode)?;
        // Catch a symlink planted inside the root that would otherwise
        // redirect this open outside of it.
        path::confine_existing(&self.root(), &resolved).map_err(sanitize_err_to_io)?;
        Ok(result)
    }

    fn create_new(
        &mut self,
        file: &Path,
        mode: TransferMode,
        len: Option<u64>,
    ) -> io::Result<Self::W> {
        if self.policy.readonly {
            return Err(io::Error::new(
                io::ErrorKind::PermissionDenied,
                "server is read-only",
            ));
        }
        let resolved = self.resolve(file)?;
        self.io.create_new(&resolved, mode, len)
    }
}

fn sanitize_err_to_io(e: SanitizeError) -> io::Error {
    match e {
        SanitizeError::Invalid => io::Error::new(io::ErrorKind::NotFound, e.to_string()),
        SanitizeError::Escape => io::Error::new(io::ErrorKind::PermissionDenied, e.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::TftpOption;
    use std::io::Cursor;

    struct MemAdapter {
        data: Vec<u8>,
    }

    impl IOAdapter for MemAdapter {
        type R = Cursor<Vec<u8>>;
        type W = Cursor<Vec<u8>>;

        fn open_read(
            &self,
            _file: &Path,
            _mode: TransferMode,
        ) -> io::Result<(Self::R, Option<u64>)> {
            let len = self.data.len() as u64;
            Ok((Cursor::new(self.data.clone()), Some(len)))
        }

        fn create_new(
            &mut self,
            _file: &Path,
            _mode: TransferMode,
            _len: Option<u64>,
        ) -> io::Result<Self::W> {
            Ok(Cursor::new(vec![]))
        }
    }

    impl Default for MemAdapter {
        fn default() -> Self {
            MemAdapter { data: vec![] }
        }
    }

    fn peer() -> SocketAddr {
        "127.0.0.1:12345".parse().unwrap()
    }

    #[test]
    fn rrq_exact_multiple_block_size_sends_trailing_empty_block() {
        let mut proto =
            TftpServerProto::new(MemAdapter { data: vec![7; 1024] }, IOPolicyCfg::default());
        let (xfer, first) = proto.rx_initial(
            Packet::RRQ {
                filename: "f".to_owned(),
                mode: TransferMode::Octet,
                options: vec![TftpOption::Blocksize(512)],
            },
            peer(),
        );
        // no options accepted besides blksize which is echoed via OACK
        assert!(xfer.is_some());
        let mut xfer = xfer.unwrap();
        assert_eq!(
            first.unwrap(),
            Packet::OACK {
                options: vec![TftpOption::Blocksize(512)]
            }
        );

        let resp: Vec<_> = xfer.rx(Packet::ACK(0)).unwrap().collect();
        assert_eq!(
            resp,
            vec![ResponseItem::Packet(Packet::DATA {
                block_num: 1,
                data: vec![7; 512]
            })]
        );

        let resp: Vec<_> = xfer.rx(Packet::ACK(1)).unwrap().collect();
        assert_eq!(
            resp,
            vec![ResponseItem::Packet(Packet::DATA {
                block_num: 2,
                data: vec![7; 512]
            })]
        );

        let resp: Vec<_> = xfer.rx(Packet::ACK(2)).unwrap().collect();
        assert_eq!(
            resp,
            vec![ResponseItem::Packet(Packet::DATA {
                block_num: 3,
                data: vec![]
            })]
        );
        assert!(!xfer.is_done());

        let resp: Vec<_> = xfer.rx(Packet::ACK(3)).unwrap().collect();
        assert_eq!(resp, vec![ResponseItem::Done]);
        assert!(xfer.is_done());
    }

    #[test]
    fn duplicate_ack_is_ignored() {
        let mut proto =
            TftpServerProto::new(MemAdapter { data: vec![1, 2, 3] }, IOPolicyCfg::default());
        let (xfer, _first) = proto.rx_initial(
            Packet::RRQ {
                filename: "f".to_owned(),
                mode: TransferMode::Octet,
                options: vec![],
            },
            peer(),
        );
        let mut xfer = xfer.unwrap();

        // duplicate ACK(0) after DATA(1) was already sent produces nothing
        let resp: Vec<_> = xfer.rx(Packet::ACK(0)).unwrap().collect();
        assert_eq!(resp, vec![]);
    }

    #[test]
    fn wrq_wrong_block_reacks_previous() {
        let mut proto = TftpServerProto::new(MemAdapter::default(), IOPolicyCfg::default());
        let (xfer, first) = proto.rx_initial(
            Packet::WRQ {
                filename: "f".to_owned(),
                mode: TransferMode::Octet,
                options: vec![],
            },
            peer(),
        );
        assert_eq!(first.unwrap(), Packet::ACK(0));
        let mut xfer = xfer.unwrap();

        let resp: Vec<_> = xfer
            .rx(Packet::DATA {
                block_num: 5,
                data: vec![1, 2, 3],
            })
            .unwrap()
            .collect();
        assert_eq!(resp, vec![ResponseItem::Packet(Packet::ACK(0))]);
    }

    #[test]
    fn mail_mode_rejected() {
        let mut proto = TftpServerProto::new(MemAdapter::default(), IOPolicyCfg::default());
        let (xfer, resp) = proto.rx_initial(
            Packet::RRQ {
                filename: "f".to_owned(),
                mode: TransferMode::Mail,
                options: vec![],
            },
            peer(),
        );
        assert!(xfer.is_none());
        assert_eq!(
            resp.unwrap(),
            Packet::ERROR {
                code: ErrorCode::NoUser,
                msg: ErrorCode::NoUser.to_string(),
            }
        );
    }

    #[test]
    fn timeout_retransmits_then_abandons() {
        let mut proto = TftpServerProto::with_engine_cfg(
            MemAdapter { data: vec![1, 2, 3] },
            IOPolicyCfg::default(),
            EngineCfg {
                ack_timeout: Duration::from_millis(100),
                timeout: Duration::from_millis(250),
            },
        );
        let (xfer, _first) = proto.rx_initial(
            Packet::RRQ {
                filename: "f".to_owned(),
                mode: TransferMode::Octet,
                options: vec![],
            },
            peer(),
        );
        let mut xfer = xfer.unwrap();
        assert_eq!(xfer.retransmit_interval(), Duration::from_millis(100));

        // two retransmits keep the transfer alive (100ms, 200ms elapsed)...
        assert_eq!(xfer.timeout_expired(), ResponseItem::RepeatLast);
        assert!(!xfer.is_done());
        assert_eq!(xfer.timeout_expired(), ResponseItem::RepeatLast);
        assert!(!xfer.is_done());
        // ...but the third (300ms) exceeds the 250ms inactivity budget.
        assert_eq!(xfer.timeout_expired(), ResponseItem::Done);
        assert!(xfer.is_done());
    }

    #[test]
    fn progress_resets_the_inactivity_budget() {
        let mut proto = TftpServerProto::with_engine_cfg(
            MemAdapter { data: vec![1; 2000] },
            IOPolicyCfg::default(),
            EngineCfg {
                ack_timeout: Duration::from_millis(100),
                timeout: Duration::from_millis(250),
            },
        );
        let (xfer, _first) = proto.rx_initial(
            Packet::RRQ {
                filename: "f".to_owned(),
                mode: TransferMode::Octet,
                options: vec![],
            },
            peer(),
        );
        let mut xfer = xfer.unwrap();

        assert_eq!(xfer.timeout_expired(), ResponseItem::RepeatLast);
        // a real ACK arrives before the budget is exhausted...
        let _ = xfer.rx(Packet::ACK(1)).unwrap();
        // ...so the budget starts over instead of carrying the prior elapsed time.
        assert_eq!(xfer.timeout_expired(), ResponseItem::RepeatLast);
        assert!(!xfer.is_done());
    }

    struct PrefixResolver;
    impl FilenameResolver for PrefixResolver {
        fn resolve(&self, filename: &str, _peer: SocketAddr) -> String {
            format!("prefixed-{}", filename)
        }
    }

    #[test]
    fn resolver_rewrites_filename_before_sanitizing() {
        struct RecordingAdapter;
        impl IOAdapter for RecordingAdapter {
            type R = Cursor<Vec<u8>>;
            type W = Cursor<Vec<u8>>;
            fn open_read(
                &self,
                file: &Path,
                _mode: TransferMode,
            ) -> io::Result<(Self::R, Option<u64>)> {
                assert_eq!(file.file_name().unwrap(), "prefixed-f");
                Ok((Cursor::new(vec![]), Some(0)))
            }
            fn create_new(
                &mut self,
                _file: &Path,
                _mode: TransferMode,
                _len: Option<u64>,
            ) -> io::Result<Self::W> {
                unreachable!()
            }
        }

        let mut proto =
            TftpServerProto::new(RecordingAdapter, IOPolicyCfg::default())
                .with_resolver(Arc::new(PrefixResolver));
        let (xfer, _first) = proto.rx_initial(
            Packet::RRQ {
                filename: "f".to_owned(),
                mode: TransferMode::Octet,
                options: vec![],
            },
            peer(),
        );
        assert!(xfer.is_some());
    }
}
