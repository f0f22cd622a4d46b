//! MQTT Packet Encoder
//!
//! Encodes MQTT v3.1.1 packets

use bytes::{BufMut, BytesMut};

use super::{write_binary, write_string, write_variable_int};
use crate::protocol::{
    ConnAck, Connect, EncodeError, Packet, PubAck, Publish, QoS, SubAck, Subscribe, PROTOCOL_LEVEL,
    PROTOCOL_NAME,
};

/// MQTT Packet Encoder
#[derive(Debug, Default, Clone, Copy)]
pub struct Encoder;

impl Encoder {
    pub fn new() -> Self {
        Self
    }

    /// Encode a packet to the buffer
    pub fn encode(&self, packet: &Packet, buf: &mut BytesMut) -> Result<(), EncodeError> {
        match packet {
            Packet::Connect(p) => self.encode_connect(p, buf),
            Packet::ConnAck(p) => self.encode_connack(p, buf),
            Packet::Publish(p) => self.encode_publish(p, buf),
            Packet::PubAck(p) => self.encode_puback(p, buf),
            Packet::Subscribe(p) => self.encode_subscribe(p, buf),
            Packet::SubAck(p) => self.encode_suback(p, buf),
            Packet::PingReq => {
                buf.put_u8(0xC0); // PINGREQ type + flags
                buf.put_u8(0x00); // Remaining length
                Ok(())
            }
            Packet::PingResp => {
                buf.put_u8(0xD0); // PINGRESP type + flags
                buf.put_u8(0x00); // Remaining length
                Ok(())
            }
            Packet::Disconnect => {
                buf.put_u8(0xE0); // DISCONNECT type + flags
                buf.put_u8(0x00); // Remaining length
                Ok(())
            }
        }
    }

    fn encode_connect(&self, packet: &Connect, buf: &mut BytesMut) -> Result<(), EncodeError> {
        if packet.password.is_some() && packet.username.is_none() {
            return Err(EncodeError::PasswordWithoutUsername);
        }

        // Protocol name + level + connect flags + keep alive
        let mut remaining_length = 2 + PROTOCOL_NAME.len() + 1 + 1 + 2;
        remaining_length += 2 + packet.client_id.len();
        if let Some(ref username) = packet.username {
            remaining_length += 2 + username.len();
        }
        if let Some(ref password) = packet.password {
            remaining_length += 2 + password.len();
        }

        buf.put_u8(0x10);
        write_variable_int(buf, remaining_length as u32)?;

        write_string(buf, PROTOCOL_NAME)?;
        buf.put_u8(PROTOCOL_LEVEL);

        let mut connect_flags: u8 = 0;
        if packet.clean_session {
            connect_flags |= 0x02;
        }
        if packet.password.is_some() {
            connect_flags |= 0x40;
        }
        if packet.username.is_some() {
            connect_flags |= 0x80;
        }
        buf.put_u8(connect_flags);
        buf.put_u16(packet.keep_alive);

        write_string(buf, &packet.client_id)?;
        if let Some(ref username) = packet.username {
            write_string(buf, username)?;
        }
        if let Some(ref password) = packet.password {
            write_binary(buf, password)?;
        }

        Ok(())
    }

    fn encode_connack(&self, packet: &ConnAck, buf: &mut BytesMut) -> Result<(), EncodeError> {
        buf.put_u8(0x20);
        buf.put_u8(0x02);
        buf.put_u8(if packet.session_present { 0x01 } else { 0x00 });
        buf.put_u8(packet.return_code as u8);
        Ok(())
    }

    fn encode_publish(&self, packet: &Publish, buf: &mut BytesMut) -> Result<(), EncodeError> {
        if packet.topic.is_empty() || packet.topic.contains(['+', '#']) {
            return Err(EncodeError::InvalidTopicName);
        }
        if packet.qos != QoS::AtMostOnce && packet.packet_id.is_none() {
            return Err(EncodeError::MissingPacketId);
        }

        let mut remaining_length = 2 + packet.topic.len() + packet.payload.len();
        if packet.qos != QoS::AtMostOnce {
            remaining_length += 2;
        }

        let mut first_byte = 0x30 | ((packet.qos as u8) << 1);
        if packet.dup {
            first_byte |= 0x08;
        }
        if packet.retain {
            first_byte |= 0x01;
        }

        buf.put_u8(first_byte);
        write_variable_int(buf, remaining_length as u32)?;
        write_string(buf, &packet.topic)?;
        if let (QoS::AtLeastOnce | QoS::ExactlyOnce, Some(id)) = (packet.qos, packet.packet_id) {
            buf.put_u16(id);
        }
        buf.put_slice(&packet.payload);

        Ok(())
    }

    fn encode_puback(&self, packet: &PubAck, buf: &mut BytesMut) -> Result<(), EncodeError> {
        buf.put_u8(0x40);
        buf.put_u8(0x02);
        buf.put_u16(packet.packet_id);
        Ok(())
    }

    fn encode_subscribe(&self, packet: &Subscribe, buf: &mut BytesMut) -> Result<(), EncodeError> {
        let remaining_length = 2 + packet
            .filters
            .iter()
            .map(|(filter, _)| 2 + filter.len() + 1)
            .sum::<usize>();

        // SUBSCRIBE requires the reserved flags 0010
        buf.put_u8(0x82);
        write_variable_int(buf, remaining_length as u32)?;
        buf.put_u16(packet.packet_id);
        for (filter, qos) in &packet.filters {
            write_string(buf, filter)?;
            buf.put_u8(*qos as u8);
        }

        Ok(())
    }

    fn encode_suback(&self, packet: &SubAck, buf: &mut BytesMut) -> Result<(), EncodeError> {
        let remaining_length = 2 + packet.return_codes.len();

        buf.put_u8(0x90);
        write_variable_int(buf, remaining_length as u32)?;
        buf.put_u16(packet.packet_id);
        for code in &packet.return_codes {
            buf.put_u8(code.to_u8());
        }

        Ok(())
    }
}
