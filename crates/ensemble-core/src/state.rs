//! Processor state bundles and their persisted binary form.
//!
//! A state record carries an optional program, an optional bypass flag and
//! lists of parameter and property changes. The serialized layout is
//! versioned and bit-exact: all integers little-endian, strings
//! length-prefixed UTF-8.

use crate::error::{Error, Result};
use crate::types::ObjectId;

const STATE_FORMAT_VERSION: u32 = 1;

const FLAG_PROGRAM: u8 = 0x01;
const FLAG_BYPASS: u8 = 0x02;

/// Full state of a processor: program, bypass, parameter values and
/// property values.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProcessorState {
    uid: String,
    program: Option<i32>,
    bypassed: Option<bool>,
    parameter_changes: Vec<(ObjectId, f32)>,
    property_changes: Vec<(ObjectId, String)>,
}

impl ProcessorState {
    pub fn new(uid: &str) -> Self {
        Self {
            uid: uid.to_owned(),
            ..Default::default()
        }
    }

    /// Uid of the processor type this state belongs to.
    pub fn uid(&self) -> &str {
        &self.uid
    }

    pub fn set_program(&mut self, program: i32) {
        self.program = Some(program);
    }

    pub fn set_bypass(&mut self, enabled: bool) {
        self.bypassed = Some(enabled);
    }

    pub fn add_parameter_change(&mut self, parameter_id: ObjectId, value: f32) {
        self.parameter_changes.push((parameter_id, value));
    }

    pub fn add_property_change(&mut self, property_id: ObjectId, value: &str) {
        self.property_changes.push((property_id, value.to_owned()));
    }

    pub fn program(&self) -> Option<i32> {
        self.program
    }

    pub fn bypassed(&self) -> Option<bool> {
        self.bypassed
    }

    pub fn parameters(&self) -> &[(ObjectId, f32)] {
        &self.parameter_changes
    }

    pub fn properties(&self) -> &[(ObjectId, String)] {
        &self.property_changes
    }

    /// Serialize to the versioned binary record.
    pub fn serialize(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(
            32 + self.uid.len()
                + self.parameter_changes.len() * 8
                + self
                    .property_changes
                    .iter()
                    .map(|(_, v)| v.len() + 8)
                    .sum::<usize>(),
        );
        out.extend_from_slice(&STATE_FORMAT_VERSION.to_le_bytes());
        out.extend_from_slice(&(self.uid.len() as u32).to_le_bytes());
        out.extend_from_slice(self.uid.as_bytes());

        let mut flags = 0u8;
        if self.program.is_some() {
            flags |= FLAG_PROGRAM;
        }
        if self.bypassed.is_some() {
            flags |= FLAG_BYPASS;
        }
        out.push(flags);
        if let Some(program) = self.program {
            out.extend_from_slice(&program.to_le_bytes());
        }
        if let Some(bypassed) = self.bypassed {
            out.push(bypassed as u8);
        }

        out.extend_from_slice(&(self.parameter_changes.len() as u32).to_le_bytes());
        for &(id, value) in &self.parameter_changes {
            out.extend_from_slice(&id.to_le_bytes());
            out.extend_from_slice(&value.to_le_bytes());
        }

        out.extend_from_slice(&(self.property_changes.len() as u32).to_le_bytes());
        for (id, value) in &self.property_changes {
            out.extend_from_slice(&id.to_le_bytes());
            out.extend_from_slice(&(value.len() as u32).to_le_bytes());
            out.extend_from_slice(value.as_bytes());
        }
        out
    }

    /// Parse a serialized record.
    pub fn deserialize(bytes: &[u8]) -> Result<Self> {
        let mut reader = Reader::new(bytes);
        let version = reader.u32()?;
        if version != STATE_FORMAT_VERSION {
            return Err(Error::CorruptState(format!(
                "unsupported state format version {version}"
            )));
        }
        let uid = reader.string()?;
        let flags = reader.u8()?;
        let program = if flags & FLAG_PROGRAM != 0 {
            Some(reader.i32()?)
        } else {
            None
        };
        let bypassed = if flags & FLAG_BYPASS != 0 {
            Some(reader.u8()? != 0)
        } else {
            None
        };

        let parameter_count = reader.u32()? as usize;
        let mut parameter_changes = Vec::with_capacity(parameter_count.min(4096));
        for _ in 0..parameter_count {
            let id = reader.u32()?;
            let value = f32::from_le_bytes(reader.array()?);
            parameter_changes.push((id, value));
        }

        let property_count = reader.u32()? as usize;
        let mut property_changes = Vec::with_capacity(property_count.min(4096));
        for _ in 0..property_count {
            let id = reader.u32()?;
            let value = reader.string()?;
            property_changes.push((id, value));
        }

        Ok(Self {
            uid,
            program,
            bypassed,
            parameter_changes,
            property_changes,
        })
    }
}

struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8]> {
        if self.pos + len > self.bytes.len() {
            return Err(Error::CorruptState("record truncated".into()));
        }
        let slice = &self.bytes[self.pos..self.pos + len];
        self.pos += len;
        Ok(slice)
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let slice = self.take(N)?;
        let mut out = [0u8; N];
        out.copy_from_slice(slice);
        Ok(out)
    }

    fn u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    fn u32(&mut self) -> Result<u32> {
        Ok(u32::from_le_bytes(self.array()?))
    }

    fn i32(&mut self) -> Result<i32> {
        Ok(i32::from_le_bytes(self.array()?))
    }

    fn string(&mut self) -> Result<String> {
        let len = self.u32()? as usize;
        let bytes = self.take(len)?;
        String::from_utf8(bytes.to_vec())
            .map_err(|_| Error::CorruptState("string is not valid UTF-8".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip_full_record() {
        let mut state = ProcessorState::new("ensemble.gain");
        state.set_program(3);
        state.set_bypass(true);
        state.add_parameter_change(10, 0.5);
        state.add_parameter_change(11, 1.0);
        state.add_property_change(12, "warm pad");

        let bytes = state.serialize();
        let parsed = ProcessorState::deserialize(&bytes).unwrap();
        assert_eq!(parsed, state);
    }

    #[test]
    fn test_round_trip_minimal_record() {
        let state = ProcessorState::new("x");
        let parsed = ProcessorState::deserialize(&state.serialize()).unwrap();
        assert_eq!(parsed.program(), None);
        assert_eq!(parsed.bypassed(), None);
        assert!(parsed.parameters().is_empty());
        assert!(parsed.properties().is_empty());
    }

    #[test]
    fn test_layout_is_stable() {
        let mut state = ProcessorState::new("ab");
        state.set_bypass(false);
        state.add_parameter_change(7, 1.0);

        let bytes = state.serialize();
        let expected: Vec<u8> = [
            &1u32.to_le_bytes()[..],     // version
            &2u32.to_le_bytes()[..],     // uid length
            b"ab",                       // uid
            &[0x02][..],                 // flags: bypass only
            &[0x00][..],                 // bypass = false
            &1u32.to_le_bytes()[..],     // parameter count
            &7u32.to_le_bytes()[..],     // parameter id
            &1.0f32.to_le_bytes()[..],   // parameter value
            &0u32.to_le_bytes()[..],     // property count
        ]
        .concat();
        assert_eq!(bytes, expected);
    }

    #[test]
    fn test_truncated_record_is_rejected() {
        let mut state = ProcessorState::new("ensemble.gain");
        state.add_parameter_change(1, 0.25);
        let bytes = state.serialize();
        assert!(ProcessorState::deserialize(&bytes[..bytes.len() - 2]).is_err());
    }

    #[test]
    fn test_wrong_version_is_rejected() {
        let state = ProcessorState::new("x");
        let mut bytes = state.serialize();
        bytes[0] = 9;
        assert!(ProcessorState::deserialize(&bytes).is_err());
    }
}
