use std::time::Duration;

use tsgate_proto::{pdu::DataPdu, ExtendedAuth, RedirectFlags, TunnelCapabilities};

/// The server policy a [`Gateway`](super::Gateway) applies to every tunnel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayPolicy {
    /// Whether smart card authentication is offered during the handshake.
    pub smart_card_auth: bool,

    /// How long a relaying tunnel may go without traffic before it is closed. `None` disables the
    /// idle timeout.
    pub idle_timeout: Option<Duration>,

    /// Which devices the client may redirect into the backend session.
    pub redirect: RedirectPolicy,

    /// How often a keepalive PDU is sent on the outbound stream when no data was sent.
    pub keepalive_interval: Duration,

    /// How long after a tunnel is registered its inbound stream may arrive.
    pub pairing_timeout: Duration,

    /// The maximum time to wait for each PDU of the control phase.
    pub handshake_timeout: Duration,

    /// The maximum payload of the Data PDUs sent to the client.
    pub max_payload: usize,
}

impl GatewayPolicy {
    pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(300);
    pub const DEFAULT_KEEPALIVE_INTERVAL: Duration = Duration::from_secs(15);
    pub const DEFAULT_PAIRING_TIMEOUT: Duration = Duration::from_secs(5);
    pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(30);
    pub const DEFAULT_MAX_PAYLOAD: usize = 4096;

    /// The extended authentication methods the server offers.
    pub fn offered_extended_auth(&self) -> ExtendedAuth {
        match self.smart_card_auth {
            true => ExtendedAuth::SMART_CARD,
            false => ExtendedAuth::NONE,
        }
    }

    /// The capabilities the server announces in its tunnel response.
    pub fn server_capabilities(&self) -> TunnelCapabilities {
        match self.idle_timeout {
            Some(_) => TunnelCapabilities::IDLE_TIMEOUT,
            None => TunnelCapabilities::NONE,
        }
    }

    /// The idle timeout as announced in the tunnel auth response, in whole seconds.
    pub fn idle_timeout_secs(&self) -> u32 {
        self.idle_timeout.map_or(0, |timeout| timeout.as_secs().min(u32::MAX as u64) as u32)
    }

    /// The maximum payload, clamped to what a Data PDU can carry.
    pub fn chunk_size(&self) -> usize {
        self.max_payload.clamp(1, DataPdu::MAX_PAYLOAD)
    }
}

impl Default for GatewayPolicy {
    fn default() -> Self {
        Self {
            smart_card_auth: false,
            idle_timeout: Some(Self::DEFAULT_IDLE_TIMEOUT),
            redirect: RedirectPolicy::default(),
            keepalive_interval: Self::DEFAULT_KEEPALIVE_INTERVAL,
            pairing_timeout: Self::DEFAULT_PAIRING_TIMEOUT,
            handshake_timeout: Self::DEFAULT_HANDSHAKE_TIMEOUT,
            max_payload: Self::DEFAULT_MAX_PAYLOAD,
        }
    }
}

/// Device redirection settings. All devices are disabled by default.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RedirectPolicy {
    pub disable_all: bool,
    pub enable_all: bool,
    pub clipboard: bool,
    pub drive: bool,
    pub printer: bool,
    pub port: bool,
    pub pnp: bool,
}

impl RedirectPolicy {
    /// Gets the flags sent in the channel response for this policy.
    ///
    /// `disable_all` wins over `enable_all`, which wins over the per-device settings.
    pub fn flags(&self) -> RedirectFlags {
        if self.disable_all {
            return RedirectFlags::DISABLE_ALL;
        }

        if self.enable_all {
            return RedirectFlags::ENABLE_ALL;
        }

        let mut flags = RedirectFlags::NONE;
        let devices = [
            (self.drive, RedirectFlags::DISABLE_DRIVE),
            (self.printer, RedirectFlags::DISABLE_PRINTER),
            (self.port, RedirectFlags::DISABLE_PORT),
            (self.clipboard, RedirectFlags::DISABLE_CLIPBOARD),
            (self.pnp, RedirectFlags::DISABLE_PNP),
        ];

        for (enabled, disable_flag) in devices {
            if !enabled {
                flags |= disable_flag;
            }
        }

        flags
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn redirect_flags_precedence() {
        let policy = RedirectPolicy {
            disable_all: true,
            enable_all: true,
            ..Default::default()
        };
        assert_eq!(policy.flags(), RedirectFlags::DISABLE_ALL);

        let policy = RedirectPolicy {
            enable_all: true,
            ..Default::default()
        };
        assert_eq!(policy.flags(), RedirectFlags::ENABLE_ALL);
    }

    #[test]
    fn redirect_flags_per_device() {
        let policy = RedirectPolicy {
            clipboard: true,
            printer: true,
            ..Default::default()
        };
        assert_eq!(
            policy.flags(),
            RedirectFlags::DISABLE_DRIVE | RedirectFlags::DISABLE_PORT | RedirectFlags::DISABLE_PNP
        );

        assert_eq!(RedirectPolicy::default().flags(), RedirectFlags(0x1F));
    }

    #[test]
    fn capabilities_follow_idle_timeout() {
        let mut policy = GatewayPolicy::default();
        assert_eq!(policy.server_capabilities(), TunnelCapabilities::IDLE_TIMEOUT);
        assert_eq!(policy.idle_timeout_secs(), 300);

        policy.idle_timeout = None;
        assert_eq!(policy.server_capabilities(), TunnelCapabilities::NONE);
        assert_eq!(policy.idle_timeout_secs(), 0);
    }
}
