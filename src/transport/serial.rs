//! # Serial Binding
//!
//! One physical point-to-point link exposed as a single channel named by the
//! port descriptor (e.g. `/dev/ttyUSB0`). Line parameters come from the
//! specific settings `BAUDRATE`, `DATABITS`, `STOPBITS` and `PARITY`;
//! `INTER_MSG_DELAY` (milliseconds) inserts a pause after each write so
//! consecutive messages do not coalesce on slow device UARTs.
//!
//! Serial has no protocol-level acknowledgment; every write returns an
//! already-resolved token.

use crate::config::{ConnectorParameter, QoS};
use crate::error::{constants, ConnectorError, Result};
use crate::transport::binding::{DeliveryToken, InboundSender, TransportBinding};
use async_trait::async_trait;
use futures::StreamExt;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncWriteExt, WriteHalf};
use tokio::task::JoinHandle;
use tokio_serial::{DataBits, Parity, SerialPortBuilderExt, SerialStream, StopBits};
use tokio_util::codec::{BytesCodec, FramedRead};
use tracing::{debug, warn};

const DEFAULT_BAUDRATE: u32 = 9600;

fn parse_data_bits(value: i64) -> Result<DataBits> {
    match value {
        5 => Ok(DataBits::Five),
        6 => Ok(DataBits::Six),
        7 => Ok(DataBits::Seven),
        8 => Ok(DataBits::Eight),
        _ => Err(ConnectorError::InvalidConfiguration(format!(
            "DATABITS must be 5..=8, got {value}"
        ))),
    }
}

fn parse_stop_bits(value: i64) -> Result<StopBits> {
    match value {
        1 => Ok(StopBits::One),
        2 => Ok(StopBits::Two),
        _ => Err(ConnectorError::InvalidConfiguration(format!(
            "STOPBITS must be 1 or 2, got {value}"
        ))),
    }
}

fn parse_parity(value: &str) -> Result<Parity> {
    match value.to_ascii_uppercase().as_str() {
        "NONE" => Ok(Parity::None),
        "EVEN" => Ok(Parity::Even),
        "ODD" => Ok(Parity::Odd),
        other => Err(ConnectorError::InvalidConfiguration(format!(
            "PARITY must be NONE, EVEN or ODD, got '{other}'"
        ))),
    }
}

struct SerialState {
    descriptor: String,
    writer: Arc<tokio::sync::Mutex<WriteHalf<SerialStream>>>,
    inter_msg_delay: Duration,
    reader_task: JoinHandle<()>,
}

/// Serial binding backed by `tokio-serial`.
#[derive(Default)]
pub struct SerialBinding {
    state: Mutex<Option<SerialState>>,
}

impl SerialBinding {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_state<R>(&self, f: impl FnOnce(&SerialState) -> R) -> Result<R> {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        match state.as_ref() {
            Some(state) => Ok(f(state)),
            None => Err(ConnectorError::Transport(
                constants::ERR_NOT_CONNECTED.to_string(),
            )),
        }
    }

    fn check_channel(&self, channel: &str) -> Result<()> {
        self.with_state(|state| {
            if channel == state.descriptor {
                Ok(())
            } else {
                Err(ConnectorError::InvalidConfiguration(format!(
                    "serial channel must equal the port descriptor '{}', got '{channel}'",
                    state.descriptor
                )))
            }
        })?
    }
}

#[async_trait]
impl TransportBinding for SerialBinding {
    fn name(&self) -> &'static str {
        "serial"
    }

    async fn connect(&self, params: &ConnectorParameter, inbound: InboundSender) -> Result<()> {
        let descriptor = params
            .port_descriptor()
            .ok_or_else(|| {
                ConnectorError::InvalidConfiguration(
                    "serial binding requires a port descriptor".to_string(),
                )
            })?
            .to_string();

        let baudrate = params
            .specific_int("BAUDRATE")
            .map(|v| {
                u32::try_from(v).map_err(|_| {
                    ConnectorError::InvalidConfiguration(format!("BAUDRATE out of range: {v}"))
                })
            })
            .transpose()?
            .unwrap_or(DEFAULT_BAUDRATE);
        let mut builder = tokio_serial::new(&descriptor, baudrate);
        if let Some(bits) = params.specific_int("DATABITS") {
            builder = builder.data_bits(parse_data_bits(bits)?);
        }
        if let Some(bits) = params.specific_int("STOPBITS") {
            builder = builder.stop_bits(parse_stop_bits(bits)?);
        }
        if let Some(parity) = params.specific_string("PARITY") {
            builder = builder.parity(parse_parity(parity)?);
        }
        let inter_msg_delay = params
            .specific_int("INTER_MSG_DELAY")
            .filter(|v| *v > 0)
            .map(|v| Duration::from_millis(v as u64))
            .unwrap_or(Duration::ZERO);

        let stream = builder
            .open_native_async()
            .map_err(|e| ConnectorError::Connect(format!("opening '{descriptor}': {e}")))?;
        let (read_half, write_half) = tokio::io::split(stream);

        let channel = descriptor.clone();
        let reader_task = tokio::spawn(async move {
            let mut frames = FramedRead::new(read_half, BytesCodec::new());
            while let Some(frame) = frames.next().await {
                match frame {
                    Ok(bytes) => {
                        if inbound.send((channel.clone(), bytes.to_vec())).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        warn!(port = %channel, error = %e, "serial read error, stopping");
                        break;
                    }
                }
            }
            debug!(port = %channel, "serial reader ended");
        });

        *self.state.lock().unwrap_or_else(|e| e.into_inner()) = Some(SerialState {
            descriptor,
            writer: Arc::new(tokio::sync::Mutex::new(write_half)),
            inter_msg_delay,
            reader_task,
        });
        Ok(())
    }

    async fn subscribe(&self, channel: &str) -> Result<()> {
        // the single link is always "subscribed", only the name is checked
        self.check_channel(channel)
    }

    async fn unsubscribe(&self, channel: &str, _delete: bool) -> Result<()> {
        self.check_channel(channel)
    }

    async fn write(&self, channel: &str, payload: Vec<u8>, _qos: QoS) -> Result<DeliveryToken> {
        self.check_channel(channel)?;
        let (writer, delay) =
            self.with_state(|state| (state.writer.clone(), state.inter_msg_delay))?;
        {
            let mut writer = writer.lock().await;
            writer.write_all(&payload).await?;
            writer.flush().await?;
        }
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        Ok(DeliveryToken::resolved())
    }

    async fn disconnect(&self) -> Result<()> {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(state) = state {
            state.reader_task.abort();
            let mut writer = state.writer.lock().await;
            let _ = writer.shutdown().await;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn line_parameter_parsing() {
        assert_eq!(parse_data_bits(8).unwrap(), DataBits::Eight);
        assert!(parse_data_bits(9).is_err());
        assert_eq!(parse_stop_bits(2).unwrap(), StopBits::Two);
        assert!(parse_stop_bits(0).is_err());
        assert_eq!(parse_parity("even").unwrap(), Parity::Even);
        assert_eq!(parse_parity("NONE").unwrap(), Parity::None);
        assert!(parse_parity("MARK").is_err());
    }

    #[tokio::test]
    async fn operations_require_an_open_port() {
        let binding = SerialBinding::new();
        assert!(matches!(
            binding.write("/dev/ttyUSB0", b"x".to_vec(), QoS::AtMostOnce).await,
            Err(ConnectorError::Transport(_))
        ));
        assert!(binding.subscribe("/dev/ttyUSB0").await.is_err());
    }

    #[tokio::test]
    async fn connect_without_descriptor_is_invalid() {
        let binding = SerialBinding::new();
        let params = crate::config::ConnectorParameterBuilder::new("host", 80).build();
        let (tx, _rx) = tokio::sync::mpsc::channel(4);
        assert!(matches!(
            binding.connect(&params, tx).await,
            Err(ConnectorError::InvalidConfiguration(_))
        ));
    }
}
