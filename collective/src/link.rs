use comms::{OnoReceiver, OnoSender};
use tokio::{
    io::{AsyncRead, AsyncWrite},
    net::TcpStream,
};

type BoxRead = Box<dyn AsyncRead + Unpin + Send>;
type BoxWrite = Box<dyn AsyncWrite + Unpin + Send>;

/// A bidirectional framed connection to another rank.
pub(crate) struct Link {
    pub rx: OnoReceiver<BoxRead>,
    pub tx: OnoSender<BoxWrite>,
}

impl Link {
    /// Wraps any reader/writer pair, erasing the transport.
    pub fn new<R, W>(rx: R, tx: W) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (rx, tx) = comms::channel(Box::new(rx) as BoxRead, Box::new(tx) as BoxWrite);
        Self { rx, tx }
    }

    /// Wraps a connected tcp stream.
    pub fn tcp(stream: TcpStream) -> Self {
        let (rx, tx) = stream.into_split();
        Self::new(rx, tx)
    }
}
