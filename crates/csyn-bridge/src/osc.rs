//! OSC/UDP transport (§4.5.1): the DSP server is addressed over UDP with
//! `rosc`-encoded packets. Writes are batched per transaction into a single
//! bundle; reads are decoded and fanned out over broadcast channels.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Instant;

use async_trait::async_trait;
use rosc::{OscBundle, OscMessage, OscPacket, OscTime, OscType};
use tokio::net::UdpSocket;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;

use csyn_core::{CsynError, CsynResult, KwargValue};

use crate::command::{BridgeCommand, TimedBatch, Transaction};
use crate::dsp_bridge::DspBridge;
use crate::events::{AnalysisEvent, NodeEndEvent};

const ANALYSIS_ADDR: &str = "/analysis";
const N_END_ADDR: &str = "/n_end";
const RECV_BUF_SIZE: usize = 8192;

/// DSP bridge backed by a real UDP socket to an out-of-process audio
/// server, addressed in OSC.
pub struct OscBridge {
    server_addr: SocketAddr,
    socket: StdMutex<Option<Arc<UdpSocket>>>,
    outbound_tx: mpsc::UnboundedSender<TimedBatch>,
    outbound_rx: StdMutex<Option<mpsc::UnboundedReceiver<TimedBatch>>>,
    analysis_tx: broadcast::Sender<AnalysisEvent>,
    node_end_tx: broadcast::Sender<NodeEndEvent>,
    buffer_counter: Arc<AtomicI64>,
    node_counter: Arc<AtomicI64>,
    running: AtomicBool,
    clock_origin: StdMutex<Option<Instant>>,
    tasks: StdMutex<Option<(JoinHandle<()>, JoinHandle<()>)>>,
}

impl OscBridge {
    pub fn new(server_host: &str, server_port: u16) -> CsynResult<Self> {
        let server_addr: SocketAddr = format!("{server_host}:{server_port}")
            .parse()
            .map_err(|e| CsynError::Config(format!("invalid server address: {e}")))?;
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (analysis_tx, _) = broadcast::channel(256);
        let (node_end_tx, _) = broadcast::channel(256);

        Ok(Self {
            server_addr,
            socket: StdMutex::new(None),
            outbound_tx,
            outbound_rx: StdMutex::new(Some(outbound_rx)),
            analysis_tx,
            node_end_tx,
            buffer_counter: Arc::new(AtomicI64::new(0)),
            node_counter: Arc::new(AtomicI64::new(0)),
            running: AtomicBool::new(false),
            clock_origin: StdMutex::new(None),
            tasks: StdMutex::new(None),
        })
    }
}

#[async_trait]
impl DspBridge for OscBridge {
    async fn boot(&self, input_channels: u32, output_channels: u32) -> CsynResult<()> {
        if self.running.load(Ordering::SeqCst) {
            return Ok(());
        }

        let outbound_rx = self
            .outbound_rx
            .lock()
            .unwrap()
            .take()
            .ok_or_else(|| CsynError::Invariant("osc bridge booted twice without quit".into()))?;

        let socket = UdpSocket::bind("0.0.0.0:0")
            .await
            .map_err(|e| CsynError::DspTransport(e.to_string()))?;
        let socket = Arc::new(socket);
        *self.socket.lock().unwrap() = Some(socket.clone());

        let writer = spawn_writer(socket.clone(), self.server_addr, outbound_rx);
        let reader = spawn_reader(socket, self.analysis_tx.clone(), self.node_end_tx.clone());
        *self.tasks.lock().unwrap() = Some((writer, reader));

        self.running.store(true, Ordering::SeqCst);
        log::info!(
            "dsp bridge booted ({input_channels} in / {output_channels} out) -> {}",
            self.server_addr
        );
        Ok(())
    }

    async fn quit(&self) -> CsynResult<()> {
        if !self.running.swap(false, Ordering::SeqCst) {
            return Ok(());
        }
        if let Some((writer, reader)) = self.tasks.lock().unwrap().take() {
            writer.abort();
            reader.abort();
        }
        *self.socket.lock().unwrap() = None;
        log::info!("dsp bridge stopped");
        Ok(())
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    fn at(&self, time: f64) -> Transaction {
        Transaction::new(
            time,
            self.buffer_counter.clone(),
            self.node_counter.clone(),
            self.outbound_tx.clone(),
        )
    }

    fn subscribe_analysis(&self) -> broadcast::Receiver<AnalysisEvent> {
        self.analysis_tx.subscribe()
    }

    fn subscribe_node_end(&self) -> broadcast::Receiver<NodeEndEvent> {
        self.node_end_tx.subscribe()
    }

    fn clock_start(&self) {
        *self.clock_origin.lock().unwrap() = Some(Instant::now());
    }

    fn clock_stop(&self) {
        *self.clock_origin.lock().unwrap() = None;
    }

    fn now(&self) -> f64 {
        match *self.clock_origin.lock().unwrap() {
            Some(origin) => origin.elapsed().as_secs_f64(),
            None => 0.0,
        }
    }
}

fn spawn_writer(
    socket: Arc<UdpSocket>,
    server_addr: SocketAddr,
    mut outbound_rx: mpsc::UnboundedReceiver<TimedBatch>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(batch) = outbound_rx.recv().await {
            if let Err(e) = send_batch(&socket, server_addr, &batch).await {
                log::warn!("failed to send osc batch at t={}: {e}", batch.time);
            }
        }
    })
}

fn spawn_reader(
    socket: Arc<UdpSocket>,
    analysis_tx: broadcast::Sender<AnalysisEvent>,
    node_end_tx: broadcast::Sender<NodeEndEvent>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut buf = [0u8; RECV_BUF_SIZE];
        loop {
            match socket.recv_from(&mut buf).await {
                Ok((n, _addr)) => dispatch_packet(&buf[..n], &analysis_tx, &node_end_tx),
                Err(e) => {
                    log::warn!("osc recv error: {e}");
                    break;
                }
            }
        }
    })
}

async fn send_batch(socket: &UdpSocket, addr: SocketAddr, batch: &TimedBatch) -> CsynResult<()> {
    let packets: Vec<OscPacket> = batch.commands.iter().map(command_to_packet).collect();
    let bundle = OscPacket::Bundle(OscBundle {
        timetag: to_osc_time(batch.time),
        content: packets,
    });
    let bytes = rosc::encoder::encode(&bundle)
        .map_err(|e| CsynError::DspTransport(format!("osc encode failed: {e:?}")))?;
    socket
        .send_to(&bytes, addr)
        .await
        .map_err(|e| CsynError::DspTransport(e.to_string()))?;
    Ok(())
}

fn command_to_packet(command: &BridgeCommand) -> OscPacket {
    let message = match command {
        BridgeCommand::AddBuffer {
            handle,
            channel_count,
            file_path,
            starting_frame,
            frame_count,
        } => OscMessage {
            addr: "/b_allocRead".to_string(),
            args: vec![
                OscType::Int(handle.0 as i32),
                OscType::String(file_path.display().to_string()),
                OscType::Int(*starting_frame as i32),
                OscType::Int(*frame_count as i32),
                OscType::Int(*channel_count as i32),
            ],
        },
        BridgeCommand::FreeBuffer(handle) => OscMessage {
            addr: "/b_free".to_string(),
            args: vec![OscType::Int(handle.0 as i32)],
        },
        BridgeCommand::AddSynth {
            node_id,
            blueprint_id,
            kwargs,
        } => {
            let mut args = vec![
                OscType::String(blueprint_id.clone()),
                OscType::Int(node_id.0 as i32),
                OscType::Int(0), // add action: head
                OscType::Int(0), // target id: default group
            ];
            for (key, value) in kwargs {
                args.push(OscType::String(key.clone()));
                args.push(kwarg_to_osc(value));
            }
            OscMessage {
                addr: "/s_new".to_string(),
                args,
            }
        }
    };
    OscPacket::Message(message)
}

fn kwarg_to_osc(value: &KwargValue) -> OscType {
    match value {
        KwargValue::Int(v) => OscType::Int(*v as i32),
        KwargValue::Float(v) => OscType::Float(*v as f32),
        KwargValue::Bool(v) => OscType::Int(if *v { 1 } else { 0 }),
    }
}

fn to_osc_time(seconds: f64) -> OscTime {
    let whole = seconds.floor().max(0.0);
    let frac = (seconds - whole).clamp(0.0, 1.0);
    OscTime {
        seconds: whole as u32,
        fractional: (frac * u32::MAX as f64) as u32,
    }
}

fn dispatch_packet(
    bytes: &[u8],
    analysis_tx: &broadcast::Sender<AnalysisEvent>,
    node_end_tx: &broadcast::Sender<NodeEndEvent>,
) {
    match rosc::decoder::decode_udp(bytes) {
        Ok((_, packet)) => dispatch_decoded(packet, analysis_tx, node_end_tx),
        Err(e) => log::warn!("failed to decode incoming osc packet: {e:?}"),
    }
}

fn dispatch_decoded(
    packet: OscPacket,
    analysis_tx: &broadcast::Sender<AnalysisEvent>,
    node_end_tx: &broadcast::Sender<NodeEndEvent>,
) {
    match packet {
        OscPacket::Message(message) => dispatch_message(message, analysis_tx, node_end_tx),
        OscPacket::Bundle(bundle) => {
            for inner in bundle.content {
                dispatch_decoded(inner, analysis_tx, node_end_tx);
            }
        }
    }
}

fn dispatch_message(
    message: OscMessage,
    analysis_tx: &broadcast::Sender<AnalysisEvent>,
    node_end_tx: &broadcast::Sender<NodeEndEvent>,
) {
    match message.addr.as_str() {
        ANALYSIS_ADDR => {
            if let Some(event) = parse_analysis(&message.args) {
                let _ = analysis_tx.send(event);
            } else {
                log::warn!("malformed /analysis message: {:?}", message.args);
            }
        }
        N_END_ADDR => {
            if let Some(node_id) = message.args.first().and_then(as_i64) {
                let _ = node_end_tx.send(NodeEndEvent { node_id });
            } else {
                log::warn!("malformed /n_end message: {:?}", message.args);
            }
        }
        other => log::debug!("ignoring unrecognised osc address {other}"),
    }
}

fn parse_analysis(args: &[OscType]) -> Option<AnalysisEvent> {
    if args.len() < 9 {
        return None;
    }
    let node_id = as_i64(&args[1])?;
    let peak = as_f64(&args[2])?;
    let rms = as_f64(&args[3])?;
    let f0_midi = as_f64(&args[4])?;
    let is_voiced = as_f64(&args[5])? >= 0.5;
    let is_onset = as_f64(&args[6])? >= 0.5;
    let centroid = as_f64(&args[7])?;
    let flatness = as_f64(&args[8])?;
    let rolloff = args.get(9).and_then(as_f64).unwrap_or(0.0);
    let mfcc = args[10.min(args.len())..].iter().filter_map(as_f64).collect();
    Some(AnalysisEvent {
        node_id,
        peak,
        rms,
        f0_midi,
        is_voiced,
        is_onset,
        centroid,
        flatness,
        rolloff,
        mfcc,
    })
}

fn as_f64(value: &OscType) -> Option<f64> {
    match value {
        OscType::Float(v) => Some(*v as f64),
        OscType::Double(v) => Some(*v),
        OscType::Int(v) => Some(*v as f64),
        OscType::Long(v) => Some(*v as f64),
        _ => None,
    }
}

fn as_i64(value: &OscType) -> Option<i64> {
    match value {
        OscType::Int(v) => Some(*v as i64),
        OscType::Long(v) => Some(*v),
        OscType::Float(v) => Some(*v as i64),
        OscType::Double(v) => Some(*v as i64),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn osc_time_round_trips_whole_seconds() {
        let t = to_osc_time(3.5);
        assert_eq!(t.seconds, 3);
        assert!(t.fractional > 0);
    }

    #[test]
    fn parse_analysis_reads_fixed_layout_then_mfcc_tail() {
        let args = vec![
            OscType::Int(0),
            OscType::Int(42),
            OscType::Float(0.5),
            OscType::Float(-20.0),
            OscType::Float(60.0),
            OscType::Float(1.0),
            OscType::Float(0.0),
            OscType::Float(1000.0),
            OscType::Float(0.1),
            OscType::Float(5000.0),
            OscType::Float(0.1),
            OscType::Float(0.2),
        ];
        let event = parse_analysis(&args).unwrap();
        assert_eq!(event.node_id, 42);
        assert!(event.is_voiced);
        assert!(!event.is_onset);
        assert_eq!(event.mfcc, vec![0.1, 0.2]);
    }
}
