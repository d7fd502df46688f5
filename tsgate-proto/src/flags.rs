//! Bit flag words carried by the handshake, tunnel and channel PDUs.

use std::{
    fmt,
    ops::{BitOr, BitOrAssign},
};

use bytes::BytesMut;

use crate::{
    serialize::{ByteRead, ByteWrite},
    MalformedPdu,
};

macro_rules! wire_flags {
    (
        $(#[$meta:meta])*
        pub struct $name:ident($repr:ty) {
            $( $(#[$flag_meta:meta])* const $flag:ident = $value:expr; )*
        }
    ) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
        pub struct $name(pub $repr);

        impl $name {
            pub const NONE: Self = Self(0);
            $( $(#[$flag_meta])* pub const $flag: Self = Self($value); )*

            /// Gets the raw bits of this flag word.
            pub const fn bits(self) -> $repr {
                self.0
            }

            /// Whether every bit set in `other` is also set in `self`.
            pub const fn contains(self, other: Self) -> bool {
                self.0 & other.0 == other.0
            }

            pub const fn intersection(self, other: Self) -> Self {
                Self(self.0 & other.0)
            }

            pub const fn is_empty(self) -> bool {
                self.0 == 0
            }
        }

        impl BitOr for $name {
            type Output = Self;

            fn bitor(self, rhs: Self) -> Self {
                Self(self.0 | rhs.0)
            }
        }

        impl BitOrAssign for $name {
            fn bitor_assign(&mut self, rhs: Self) {
                self.0 |= rhs.0;
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({:#x})", stringify!($name), self.0)
            }
        }

        impl ByteWrite for $name {
            fn write(&self, buf: &mut BytesMut) {
                self.0.write(buf)
            }
        }

        impl ByteRead for $name {
            fn read(buf: &mut &[u8]) -> Result<Self, MalformedPdu> {
                Ok(Self(<$repr>::read(buf)?))
            }
        }
    };
}

wire_flags! {
    /// Authentication methods beyond plain NTLM/Kerberos, negotiated during the handshake.
    pub struct ExtendedAuth(u16) {
        const SMART_CARD = 0x1;
        const PAA = 0x2;
    }
}

wire_flags! {
    /// Capabilities exchanged in the tunnel create and tunnel response PDUs.
    pub struct TunnelCapabilities(u32) {
        const QUARANTINE_SOH = 0x1;
        /// The gateway enforces an idle timeout, announced in the tunnel auth response.
        const IDLE_TIMEOUT = 0x2;
        const MESSAGING_CONSENT_SIGN = 0x4;
        const MESSAGING_SERVICE_MSG = 0x8;
        const REAUTH = 0x10;
        const UDP_TRANSPORT = 0x20;
    }
}

wire_flags! {
    /// Device redirection flags sent to the client in the channel response.
    pub struct RedirectFlags(u32) {
        const ENABLE_ALL = 0x8000_0000;
        const DISABLE_ALL = 0x4000_0000;
        const DISABLE_DRIVE = 0x1;
        const DISABLE_PRINTER = 0x2;
        const DISABLE_PORT = 0x4;
        const DISABLE_CLIPBOARD = 0x8;
        const DISABLE_PNP = 0x10;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn contains_and_intersection() {
        let flags = ExtendedAuth::SMART_CARD | ExtendedAuth::PAA;
        assert!(flags.contains(ExtendedAuth::PAA));
        assert!(!ExtendedAuth::PAA.contains(flags));
        assert_eq!(flags.intersection(ExtendedAuth::SMART_CARD), ExtendedAuth::SMART_CARD);
        assert!(ExtendedAuth::NONE.is_empty());
    }

    #[test]
    fn unknown_bits_survive_a_round_trip() {
        let mut buf = BytesMut::new();
        RedirectFlags(0x0100_0003).write(&mut buf);
        let mut slice = &buf[..];
        assert_eq!(RedirectFlags::read(&mut slice), Ok(RedirectFlags(0x0100_0003)));
    }
}
