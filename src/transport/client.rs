//! Request clients used by workers.

use std::io::{BufReader, BufWriter};
use std::net::{TcpStream, ToSocketAddrs};

use crossbeam_channel::{bounded, Sender};

use super::frame::{recv_message, send_message};
use super::TransportError;
use crate::core::episode::CompressedEpisode;
use crate::core::model_version::ModelSnapshot;
use crate::messages::{
    Envelope, EvalReport, EvaluationArgs, GenerationArgs, Payload, Request, Response,
};

/// Synchronous request/response channel to the coordinator.
pub trait Client: Send {
    fn call(&mut self, request: Request) -> Result<Response, TransportError>;

    fn generation_config(&mut self) -> Result<GenerationArgs, TransportError> {
        match self.call(Request::GenerationConfig(Payload::One(())))? {
            Response::GenerationConfig(p) => p
                .into_first()
                .ok_or(TransportError::UnexpectedResponse("empty generation config")),
            other => Err(TransportError::UnexpectedResponse(other.kind())),
        }
    }

    fn evaluation_config(&mut self) -> Result<EvaluationArgs, TransportError> {
        match self.call(Request::EvaluationConfig(Payload::One(())))? {
            Response::EvaluationConfig(p) => p
                .into_first()
                .ok_or(TransportError::UnexpectedResponse("empty evaluation config")),
            other => Err(TransportError::UnexpectedResponse(other.kind())),
        }
    }

    fn submit_episode(&mut self, episode: Option<CompressedEpisode>) -> Result<(), TransportError> {
        match self.call(Request::EpisodeSubmit(Payload::One(episode)))? {
            Response::Ack(_) => Ok(()),
            other => Err(TransportError::UnexpectedResponse(other.kind())),
        }
    }

    fn submit_result(&mut self, report: EvalReport) -> Result<(), TransportError> {
        match self.call(Request::ResultSubmit(Payload::One(report)))? {
            Response::Ack(_) => Ok(()),
            other => Err(TransportError::UnexpectedResponse(other.kind())),
        }
    }

    fn fetch_model(&mut self, era: u64) -> Result<ModelSnapshot, TransportError> {
        match self.call(Request::ModelFetch(Payload::One(era)))? {
            Response::Model(p) => p
                .into_first()
                .ok_or(TransportError::UnexpectedResponse("empty model list")),
            other => Err(TransportError::UnexpectedResponse(other.kind())),
        }
    }
}

/// In-process client over the coordinator's envelope channel.
#[derive(Debug, Clone)]
pub struct LocalClient {
    tx: Sender<Envelope>,
}

impl LocalClient {
    pub fn new(tx: Sender<Envelope>) -> Self {
        Self { tx }
    }
}

impl Client for LocalClient {
    fn call(&mut self, request: Request) -> Result<Response, TransportError> {
        // A dropped envelope drops the reply sender, so a stopped coordinator
        // surfaces as `Disconnected` instead of blocking forever.
        let (reply, rx) = bounded(1);
        self.tx
            .send(Envelope { request, reply })
            .map_err(|_| TransportError::Disconnected)?;
        rx.recv().map_err(|_| TransportError::Disconnected)
    }
}

/// Client for a remote [`RequestServer`](super::RequestServer).
#[derive(Debug)]
pub struct TcpClient {
    reader: BufReader<TcpStream>,
    writer: BufWriter<TcpStream>,
}

impl TcpClient {
    pub fn connect(addr: impl ToSocketAddrs) -> Result<Self, TransportError> {
        let stream = TcpStream::connect(addr)?;
        stream.set_nodelay(true)?;
        let reader = BufReader::new(stream.try_clone()?);
        Ok(Self {
            reader,
            writer: BufWriter::new(stream),
        })
    }
}

impl Client for TcpClient {
    fn call(&mut self, request: Request) -> Result<Response, TransportError> {
        send_message(&mut self.writer, &request)?;
        match recv_message(&mut self.reader) {
            Err(TransportError::UnexpectedEof) => Err(TransportError::Disconnected),
            other => other,
        }
    }
}
