//! CRC-16 used by the packet error control field
//!
//! Register starts at 0xFFFF, polynomial 0x1021, MSB first, no final XOR.
//! Ground tooling computes the same transform.

/// Size of the trailing CRC field in bytes
pub const CRC_LEN: usize = 2;

const PACKET_CRC: ::crc::Crc<u16> = ::crc::Crc::<u16>::new(&::crc::CRC_16_IBM_3740);

/// Compute the CRC-16 over `data`
pub fn crc16(data: &[u8]) -> u16 {
    PACKET_CRC.checksum(data)
}

/// Append the big-endian CRC of `frame` to it
pub fn append_crc(frame: &mut Vec<u8>) {
    let crc = crc16(frame);
    frame.extend_from_slice(&crc.to_be_bytes());
}

/// Check the trailing CRC of `frame`. Returns the received and computed
/// values on mismatch.
pub fn verify_crc(frame: &[u8]) -> Result<(), (u16, u16)> {
    if frame.len() < CRC_LEN {
        return Err((0, crc16(&[])));
    }
    let (body, tail) = frame.split_at(frame.len() - CRC_LEN);
    let received = u16::from_be_bytes([tail[0], tail[1]]);
    let computed = crc16(body);
    if received == computed {
        Ok(())
    } else {
        Err((received, computed))
    }
}
