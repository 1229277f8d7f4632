// Kernel route-edit record encoding and /proc/net/route decoding
//
// `RouteEditRecord` mirrors the legacy `struct rtentry` consumed by the
// SIOCADDRT/SIOCDELRT ioctls. Every padding byte the C compiler would insert
// is spelled out as a named field, so the record has no implicit padding and
// its byte image is fully defined.

use std::mem::offset_of;
use std::net::Ipv4Addr;
use std::ptr;

use crate::error::{AppError, AppResult};

#[cfg(not(target_pointer_width = "64"))]
compile_error!("the rtentry layout below is only defined for 64-bit targets");

pub const RTF_UP: u16 = 0x0001;
pub const RTF_HOST: u16 = 0x0004;
pub const RTF_REJECT: u16 = 0x0200;

/// Flags of every route this daemon installs (0x0205).
pub const BLACKHOLE_FLAGS: u16 = RTF_UP | RTF_HOST | RTF_REJECT;

/// Size of `struct rtentry` on 64-bit Linux.
pub const RECORD_SIZE: usize = 120;

const ZERO_GATEWAY: &str = "00000000";

/// IPv4 socket address as embedded in `struct rtentry` (16 bytes).
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InetSockaddr {
    /// 0: address family, host byte order
    pub family: u16,
    /// 2: port, network byte order (always zero here)
    pub port: [u8; 2],
    /// 4: address, network byte order
    pub addr: [u8; 4],
    /// 8: `sin_zero`
    pub zero: [u8; 8],
}

impl InetSockaddr {
    pub const fn inet(addr: [u8; 4]) -> Self {
        InetSockaddr {
            family: libc::AF_INET as u16,
            port: [0; 2],
            addr,
            zero: [0; 8],
        }
    }
}

/// Byte-exact `struct rtentry`. Offsets are asserted at compile time below.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RouteEditRecord {
    pub pad1: u64,              // 0
    pub dst: InetSockaddr,      // 8
    pub gateway: InetSockaddr,  // 24
    pub genmask: InetSockaddr,  // 40
    pub flags: u16,             // 56
    pub pad2: i16,              // 58
    pub align0: [u8; 4],        // 60
    pub pad3: u64,              // 64
    pub tos: u8,                // 72
    pub class: u8,              // 73
    pub pad4: [i16; 3],         // 74
    pub metric: i16,            // 80
    pub align1: [u8; 6],        // 82
    pub dev: *mut libc::c_char, // 88
    pub mtu: u64,               // 96
    pub window: u64,            // 104
    pub irtt: u16,              // 112
    pub tail: [u8; 6],          // 114
}

const _: () = {
    assert!(size_of::<InetSockaddr>() == 16);
    assert!(size_of::<RouteEditRecord>() == RECORD_SIZE);
    assert!(offset_of!(RouteEditRecord, dst) == 8);
    assert!(offset_of!(RouteEditRecord, gateway) == 24);
    assert!(offset_of!(RouteEditRecord, genmask) == 40);
    assert!(offset_of!(RouteEditRecord, flags) == 56);
    assert!(offset_of!(RouteEditRecord, pad2) == 58);
    assert!(offset_of!(RouteEditRecord, align0) == 60);
    assert!(offset_of!(RouteEditRecord, pad3) == 64);
    assert!(offset_of!(RouteEditRecord, tos) == 72);
    assert!(offset_of!(RouteEditRecord, class) == 73);
    assert!(offset_of!(RouteEditRecord, pad4) == 74);
    assert!(offset_of!(RouteEditRecord, metric) == 80);
    assert!(offset_of!(RouteEditRecord, align1) == 82);
    assert!(offset_of!(RouteEditRecord, dev) == 88);
    assert!(offset_of!(RouteEditRecord, mtu) == 96);
    assert!(offset_of!(RouteEditRecord, window) == 104);
    assert!(offset_of!(RouteEditRecord, irtt) == 112);
    assert!(offset_of!(RouteEditRecord, tail) == 114);
};

impl RouteEditRecord {
    /// Host (/32) route to `addr` with no gateway and the given flags.
    pub fn host(addr: Ipv4Addr, flags: u16) -> Self {
        RouteEditRecord {
            pad1: 0,
            dst: InetSockaddr::inet(addr.octets()),
            gateway: InetSockaddr::inet([0; 4]),
            genmask: InetSockaddr::inet([0xff; 4]),
            flags,
            pad2: 0,
            align0: [0; 4],
            pad3: 0,
            tos: 0,
            class: 0,
            pad4: [0; 3],
            metric: 0,
            align1: [0; 6],
            dev: ptr::null_mut(),
            mtu: 0,
            window: 0,
            irtt: 0,
            tail: [0; 6],
        }
    }

    pub fn destination(&self) -> Ipv4Addr {
        Ipv4Addr::from(self.dst.addr)
    }

    /// The record exactly as the kernel reads it.
    pub fn as_bytes(&self) -> &[u8; RECORD_SIZE] {
        // SAFETY: the type is repr(C), RECORD_SIZE bytes long, and every byte
        // belongs to a named field, so all bytes are initialised.
        unsafe { &*(self as *const Self as *const [u8; RECORD_SIZE]) }
    }
}

/// Encode the blackhole route for `addr`.
pub fn encode(addr: Ipv4Addr) -> RouteEditRecord {
    RouteEditRecord::host(addr, BLACKHOLE_FLAGS)
}

/// Decode one line of /proc/net/route.
///
/// Returns `Ok(None)` for lines that do not carry the blackhole signature
/// (zero gateway, flags exactly UP|HOST|REJECT), including the header.
pub fn decode(line: &str) -> AppResult<Option<Ipv4Addr>> {
    let mut fields = line.split_whitespace();
    let (Some(_iface), Some(destination), Some(gateway), Some(flags)) =
        (fields.next(), fields.next(), fields.next(), fields.next())
    else {
        return Ok(None);
    };

    if gateway != ZERO_GATEWAY {
        return Ok(None);
    }
    if u16::from_str_radix(flags, 16) != Ok(BLACKHOLE_FLAGS) {
        return Ok(None);
    }

    parse_dump_address(destination).map(Some)
}

/// The dump prints the in-memory (network order) address as a host-order
/// integer, so on little-endian hosts the bytes come out reversed.
fn parse_dump_address(field: &str) -> AppResult<Ipv4Addr> {
    if field.len() != 8 || !field.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(AppError::Format(format!("invalid destination {:?}", field)));
    }
    let raw = u32::from_str_radix(field, 16)
        .map_err(|e| AppError::Format(format!("invalid destination {:?}: {}", field, e)))?;
    Ok(Ipv4Addr::from(raw.to_le_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Render a record the way the kernel lists it in /proc/net/route.
    fn dump_line(record: &RouteEditRecord) -> String {
        format!(
            "*\t{:08X}\t{:08X}\t{:04X}\t0\t0\t0\t{:08X}\t0\t0\t0",
            u32::from_le_bytes(record.dst.addr),
            u32::from_le_bytes(record.gateway.addr),
            record.flags,
            u32::from_le_bytes(record.genmask.addr),
        )
    }

    #[test]
    fn test_encode_localhost() {
        let record = encode(Ipv4Addr::new(127, 0, 0, 1));
        assert_eq!(record.dst, InetSockaddr::inet([127, 0, 0, 1]));
        assert_eq!(record.genmask, InetSockaddr::inet([0xff, 0xff, 0xff, 0xff]));
        assert_eq!(record.gateway, InetSockaddr::inet([0, 0, 0, 0]));
        assert_eq!(record.flags, RTF_UP | RTF_HOST | RTF_REJECT);
        assert!(record.dev.is_null());
    }

    #[test]
    fn test_encode_matches_expected_record() {
        let addr = Ipv4Addr::new(123, 123, 123, 125);
        let expected = RouteEditRecord {
            dst: InetSockaddr::inet([0x7b, 0x7b, 0x7b, 0x7d]),
            ..RouteEditRecord::host(Ipv4Addr::UNSPECIFIED, BLACKHOLE_FLAGS)
        };
        assert_eq!(encode(addr), expected);
        assert_eq!(encode(addr).destination(), addr);
    }

    #[test]
    fn test_record_byte_image() {
        let record = encode(Ipv4Addr::new(10, 1, 2, 3));
        let bytes = record.as_bytes();
        let family = (libc::AF_INET as u16).to_ne_bytes();

        assert_eq!(&bytes[0..8], &[0; 8]);
        // destination sockaddr
        assert_eq!(&bytes[8..10], &family);
        assert_eq!(&bytes[10..12], &[0, 0]);
        assert_eq!(&bytes[12..16], &[10, 1, 2, 3]);
        assert_eq!(&bytes[16..24], &[0; 8]);
        // gateway sockaddr
        assert_eq!(&bytes[24..26], &family);
        assert_eq!(&bytes[26..40], &[0; 14]);
        // genmask sockaddr
        assert_eq!(&bytes[40..42], &family);
        assert_eq!(&bytes[44..48], &[0xff; 4]);
        assert_eq!(&bytes[56..58], &0x0205u16.to_ne_bytes());
        assert!(bytes[58..].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_decode_proc_net_route() {
        let table = "Iface\tDestination\tGateway \tFlags\tRefCnt\tUse\tMetric\tMask\t\tMTU\tWindow\tIRTT\n\
                     eth0\t00000000\t0102A8C0\t0003\t0\t0\t100\t00000000\t0\t0\t0\n\
                     eth0\t0002A8C0\t00000000\t0001\t0\t0\t100\t00FFFFFF\t0\t0\t0\n\
                     *\t7D7B7B7B\t00000000\t0205\t0\t0\t0\tFFFFFFFF\t0\t0\t0\n";

        let decoded: Vec<_> = table
            .lines()
            .map(|line| decode(line).unwrap())
            .collect();

        assert_eq!(
            decoded,
            vec![None, None, None, Some(Ipv4Addr::new(123, 123, 123, 125))]
        );
    }

    #[test]
    fn test_decode_round_trip() {
        for addr in [
            Ipv4Addr::new(127, 0, 0, 1),
            Ipv4Addr::new(203, 0, 113, 5),
            Ipv4Addr::new(255, 255, 255, 255),
            Ipv4Addr::new(1, 2, 3, 4),
        ] {
            assert_eq!(decode(&dump_line(&encode(addr))).unwrap(), Some(addr));
        }
    }

    #[test]
    fn test_decode_skips_other_routes() {
        let gateway = RouteEditRecord {
            gateway: InetSockaddr::inet([192, 168, 2, 1]),
            ..encode(Ipv4Addr::new(10, 0, 0, 1))
        };
        assert_eq!(decode(&dump_line(&gateway)).unwrap(), None);

        let plain_host = RouteEditRecord::host(Ipv4Addr::new(10, 0, 0, 1), RTF_UP | RTF_HOST);
        assert_eq!(decode(&dump_line(&plain_host)).unwrap(), None);

        let extra_flag = RouteEditRecord::host(Ipv4Addr::new(10, 0, 0, 1), BLACKHOLE_FLAGS | 0x0002);
        assert_eq!(decode(&dump_line(&extra_flag)).unwrap(), None);

        assert_eq!(decode("").unwrap(), None);
        assert_eq!(decode("*\t7D7B7B7B").unwrap(), None);
    }

    #[test]
    fn test_decode_malformed_destination() {
        let err = decode("*\t7D7B7BZZ\t00000000\t0205\t0\t0\t0\tFFFFFFFF\t0\t0\t0").unwrap_err();
        assert!(matches!(err, AppError::Format(_)));

        let err = decode("*\t7D7B7B\t00000000\t0205\t0\t0\t0\tFFFFFFFF\t0\t0\t0").unwrap_err();
        assert!(matches!(err, AppError::Format(_)));
    }
}
