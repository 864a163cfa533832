use std::io::{self, ErrorKind};
use std::thread;
use std::time::Duration;

use pnet::datalink::{
    self,
    Channel,
    Config,
    DataLinkReceiver,
    NetworkInterface
};
use pnet::packet::ethernet::EthernetPacket;
use pnet::util::MacAddr;
use tokio_util::sync::CancellationToken;

use crate::common::MacAddress;
use crate::config::CaptureSettings;
use crate::dispatch::WakeTrigger;
use crate::error::{Error, Result};
use crate::magic::MagicPacket;

/// Anything that yields raw link-layer frames. The returned slice is only
/// valid until the next call.
pub trait FrameSource {
    fn name(&self) -> &str;
    fn next_frame(&mut self) -> io::Result<&[u8]>;
}

/// Receive half of a pnet datalink channel bound to one interface.
pub struct DatalinkSource {
    iface: String,
    rx: Box<dyn DataLinkReceiver>,
}

impl DatalinkSource {
    /// Opens `wanted`, or the first interface that is up, not loopback and has
    /// a hardware address.
    pub fn open(wanted: Option<&str>, settings: &CaptureSettings) -> Result<Self> {
        let capture_err = |iface: &str, reason: String| Error::CaptureOpen { iface: iface.to_string(), reason };

        let interfaces = datalink::interfaces();
        let selected = match wanted {
            Some(name) => interfaces.into_iter().find(|i| i.name == name),
            None => interfaces.into_iter().find(is_usable),
        };
        let Some(iface) = selected else {
            log::error!("no suitable L2 interface available!");
            return Err(capture_err(wanted.unwrap_or("*"), "no suitable interface available".to_string()));
        };

        let mut dl_cfg = Config::default();
        dl_cfg.read_buffer_size = settings.recv_buffer_size;
        dl_cfg.read_timeout = Some(Duration::from_millis(50));
        // magic packets are broadcast
        dl_cfg.promiscuous = false;

        let rx = match datalink::channel(&iface, dl_cfg) {
            Ok(Channel::Ethernet(_tx, rx)) => rx,
            Ok(_) => return Err(capture_err(&iface.name, "not an ethernet channel".to_string())),
            Err(e) => return Err(capture_err(&iface.name, e.to_string())),
        };
        log::debug!("listening on interface '{}'", iface.name);

        Ok(Self { iface: iface.name, rx })
    }
}

fn is_usable(iface: &NetworkInterface) -> bool {
    iface.is_up()
        && !iface.is_loopback()
        && iface.mac.is_some_and(|mac| mac != MacAddr::zero())
}

impl FrameSource for DatalinkSource {
    fn name(&self) -> &str {
        &self.iface
    }

    fn next_frame(&mut self) -> io::Result<&[u8]> {
        self.rx.next()
    }
}

/// What to do when reading a frame fails.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_consecutive_errors: u32,
    pub backoff: Duration,
}

impl From<&CaptureSettings> for RetryPolicy {
    fn from(settings: &CaptureSettings) -> Self {
        Self {
            max_consecutive_errors: settings.max_consecutive_errors,
            backoff: settings.retry_backoff(),
        }
    }
}

fn is_idle(kind: ErrorKind) -> bool {
    matches!(kind, ErrorKind::TimedOut | ErrorKind::WouldBlock | ErrorKind::Interrupted)
}

/// Feeds every received frame to `matcher` and hands matches to `trigger`
/// until `token` is cancelled.
///
/// Read timeouts are idle ticks. Other read errors are retried after
/// `policy.backoff`; `policy.max_consecutive_errors` of them in a row end
/// the loop with [`Error::Capture`].
pub fn run<F, T>(
    source: &mut F,
    matcher: &MagicPacket,
    trigger: &mut T,
    policy: RetryPolicy,
    token: &CancellationToken,
) -> Result<()>
where
    F: FrameSource + ?Sized,
    T: WakeTrigger + ?Sized,
{
    let iface = source.name().to_string();
    let mut errors = 0u32;

    loop {
        if token.is_cancelled() { log::trace!("[listener][{iface}] exit"); return Ok(()); }

        let frame = match source.next_frame() {
            Ok(frame) => {
                errors = 0;
                frame
            }
            Err(e) if is_idle(e.kind()) => continue,
            Err(e) => {
                errors += 1;
                if errors >= policy.max_consecutive_errors {
                    log::error!("[listener][{iface}] receive failed {errors} times in a row: {e}");
                    return Err(Error::Capture { iface, reason: e.to_string() });
                }
                log::warn!("[listener][{iface}] receive failed ({errors}/{}): {e}", policy.max_consecutive_errors);
                thread::sleep(policy.backoff);
                continue;
            }
        };

        let eth = EthernetPacket::new(frame);
        if let Some(eth) = &eth {
            log::trace!("[listener][{iface}] ethernet packet from {} to {} of type {}",
                eth.get_source(), eth.get_destination(), eth.get_ethertype());
        }

        if !matcher.matches(frame) { continue; }

        let source_mac = eth.map(|eth| MacAddress::from(eth.get_source()));
        log::debug!("[listener][{iface}] received WakeOnLan packet for {} ({} bytes)", matcher.target(), frame.len());

        trigger.trigger(source_mac)?;
    }
}
