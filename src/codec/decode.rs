//! MQTT Packet Decoder
//!
//! Decodes MQTT v3.1.1 packets from a byte buffer. Incomplete input yields
//! `Ok(None)` so callers can keep accumulating reads.

use bytes::Bytes;

use super::{read_binary, read_string, read_u16, read_variable_int, MAX_REMAINING_LENGTH};
use crate::protocol::{
    ConnAck, Connect, ConnectReturnCode, DecodeError, Packet, PubAck, Publish, QoS, SubAck,
    Subscribe, SubscribeReturnCode, PROTOCOL_LEVEL,
};

/// MQTT Packet Decoder
#[derive(Debug, Clone)]
pub struct Decoder {
    /// Maximum packet size
    max_packet_size: usize,
}

impl Default for Decoder {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder {
    pub fn new() -> Self {
        Self {
            max_packet_size: MAX_REMAINING_LENGTH,
        }
    }

    pub fn with_max_packet_size(mut self, size: usize) -> Self {
        self.max_packet_size = size.min(MAX_REMAINING_LENGTH);
        self
    }

    /// Decode a packet from the buffer
    /// Returns (packet, bytes_consumed), or None when more data is needed
    pub fn decode(&self, buf: &[u8]) -> Result<Option<(Packet, usize)>, DecodeError> {
        if buf.len() < 2 {
            return Ok(None);
        }

        // Parse fixed header
        let first_byte = buf[0];
        let packet_type = first_byte >> 4;
        let flags = first_byte & 0x0F;

        let (remaining_length, len_bytes) = match read_variable_int(&buf[1..]) {
            Ok(r) => r,
            Err(DecodeError::InsufficientData) => return Ok(None),
            Err(e) => return Err(e),
        };

        if remaining_length as usize > self.max_packet_size {
            return Err(DecodeError::PacketTooLarge);
        }

        let total_len = 1 + len_bytes + remaining_length as usize;
        if buf.len() < total_len {
            return Ok(None);
        }

        let payload = &buf[1 + len_bytes..total_len];

        let packet = match packet_type {
            1 => self.decode_connect(flags, payload)?,
            2 => self.decode_connack(flags, payload)?,
            3 => self.decode_publish(flags, payload)?,
            4 => {
                Self::expect_flags(flags, 0)?;
                Packet::PubAck(PubAck {
                    packet_id: read_u16(payload)?,
                })
            }
            8 => self.decode_subscribe(flags, payload)?,
            9 => self.decode_suback(flags, payload)?,
            12 => {
                Self::expect_flags(flags, 0)?;
                Packet::PingReq
            }
            13 => {
                Self::expect_flags(flags, 0)?;
                Packet::PingResp
            }
            14 => {
                Self::expect_flags(flags, 0)?;
                Packet::Disconnect
            }
            5 | 6 | 7 | 10 | 11 => return Err(DecodeError::UnsupportedPacketType(packet_type)),
            _ => return Err(DecodeError::InvalidPacketType(packet_type)),
        };

        Ok(Some((packet, total_len)))
    }

    fn expect_flags(flags: u8, expected: u8) -> Result<(), DecodeError> {
        if flags != expected {
            return Err(DecodeError::InvalidFlags);
        }
        Ok(())
    }

    fn decode_connect(&self, flags: u8, payload: &[u8]) -> Result<Packet, DecodeError> {
        Self::expect_flags(flags, 0)?;
        let mut pos = 0;

        let (protocol_name, len) = read_string(payload)?;
        pos += len;
        if protocol_name != "MQTT" && protocol_name != "MQIsdp" {
            return Err(DecodeError::InvalidProtocolName);
        }

        let level = *payload.get(pos).ok_or(DecodeError::InsufficientData)?;
        pos += 1;
        if level != PROTOCOL_LEVEL && level != 3 {
            return Err(DecodeError::InvalidProtocolVersion(level));
        }

        let connect_flags = *payload.get(pos).ok_or(DecodeError::InsufficientData)?;
        pos += 1;
        if (connect_flags & 0x01) != 0 {
            return Err(DecodeError::InvalidFlags);
        }
        let clean_session = (connect_flags & 0x02) != 0;
        let will_flag = (connect_flags & 0x04) != 0;
        let password_flag = (connect_flags & 0x40) != 0;
        let username_flag = (connect_flags & 0x80) != 0;

        let keep_alive = read_u16(&payload[pos..])?;
        pos += 2;

        let (client_id, len) = read_string(&payload[pos..])?;
        pos += len;

        // Will messages are accepted on the wire but not modelled
        if will_flag {
            let (_, len) = read_string(&payload[pos..])?;
            pos += len;
            let (_, len) = read_binary(&payload[pos..])?;
            pos += len;
        }

        let username = if username_flag {
            let (s, len) = read_string(&payload[pos..])?;
            pos += len;
            Some(s.to_string())
        } else {
            None
        };

        let password = if password_flag {
            let (data, _) = read_binary(&payload[pos..])?;
            Some(Bytes::copy_from_slice(data))
        } else {
            None
        };

        Ok(Packet::Connect(Box::new(Connect {
            client_id: client_id.to_string(),
            clean_session,
            keep_alive,
            username,
            password,
        })))
    }

    fn decode_connack(&self, flags: u8, payload: &[u8]) -> Result<Packet, DecodeError> {
        Self::expect_flags(flags, 0)?;
        if payload.len() < 2 {
            return Err(DecodeError::InsufficientData);
        }

        let acknowledge_flags = payload[0];
        // Only bit 0 is valid (session present), rest must be 0
        if (acknowledge_flags & 0xFE) != 0 {
            return Err(DecodeError::InvalidFlags);
        }

        let return_code = ConnectReturnCode::from_u8(payload[1])
            .ok_or(DecodeError::InvalidReturnCode(payload[1]))?;

        Ok(Packet::ConnAck(ConnAck {
            session_present: (acknowledge_flags & 0x01) != 0,
            return_code,
        }))
    }

    fn decode_publish(&self, flags: u8, payload: &[u8]) -> Result<Packet, DecodeError> {
        let dup = (flags & 0x08) != 0;
        let qos_bits = (flags >> 1) & 0x03;
        let retain = (flags & 0x01) != 0;

        let qos = QoS::from_u8(qos_bits).ok_or(DecodeError::InvalidQoS(qos_bits))?;

        let mut pos = 0;
        let (topic, len) = read_string(payload)?;
        pos += len;

        if topic.is_empty() {
            return Err(DecodeError::MalformedPacket("empty topic name"));
        }
        if topic.contains(['+', '#']) {
            return Err(DecodeError::MalformedPacket("topic contains wildcard"));
        }

        let packet_id = if qos != QoS::AtMostOnce {
            let id = read_u16(&payload[pos..])?;
            if id == 0 {
                return Err(DecodeError::MalformedPacket("packet id cannot be 0"));
            }
            pos += 2;
            Some(id)
        } else {
            None
        };

        Ok(Packet::Publish(Publish {
            dup,
            qos,
            retain,
            topic: topic.to_string(),
            packet_id,
            payload: Bytes::copy_from_slice(&payload[pos..]),
        }))
    }

    fn decode_subscribe(&self, flags: u8, payload: &[u8]) -> Result<Packet, DecodeError> {
        Self::expect_flags(flags, 0x02)?;

        let packet_id = read_u16(payload)?;
        let mut pos = 2;
        let mut filters = Vec::new();

        while pos < payload.len() {
            let (filter, len) = read_string(&payload[pos..])?;
            pos += len;

            let options = *payload.get(pos).ok_or(DecodeError::InsufficientData)?;
            pos += 1;
            if (options & 0xFC) != 0 {
                return Err(DecodeError::MalformedPacket("reserved subscription bits set"));
            }
            let qos = QoS::from_u8(options).ok_or(DecodeError::InvalidQoS(options))?;

            filters.push((filter.to_string(), qos));
        }

        if filters.is_empty() {
            return Err(DecodeError::MalformedPacket("SUBSCRIBE without topic filters"));
        }

        Ok(Packet::Subscribe(Subscribe { packet_id, filters }))
    }

    fn decode_suback(&self, flags: u8, payload: &[u8]) -> Result<Packet, DecodeError> {
        Self::expect_flags(flags, 0)?;

        let packet_id = read_u16(payload)?;
        let return_codes = payload[2..]
            .iter()
            .map(|&b| SubscribeReturnCode::from_u8(b).ok_or(DecodeError::InvalidReturnCode(b)))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Packet::SubAck(SubAck {
            packet_id,
            return_codes,
        }))
    }
}
