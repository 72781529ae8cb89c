use super::enums::{QClass, QType};
use super::name::Name;
use super::wire::{Reader, Writer};
use crate::error::Result;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Question {
    pub name: Name,
    pub qtype: QType,
    pub qclass: QClass,
}

impl Question {
    pub fn new(name: Name, qtype: QType, qclass: QClass) -> Self {
        Self { name, qtype, qclass }
    }

    pub fn read(reader: &mut Reader<'_>) -> Result<Self> {
        let name = Name::read(reader)?;
        let qtype = QType(reader.read_u16()?);
        let qclass = QClass(reader.read_u16()?);
        Ok(Self { name, qtype, qclass })
    }

    pub fn write(&self, writer: &mut Writer) -> Result<()> {
        self.name.write(writer)?;
        writer.write_u16(self.qtype.0);
        writer.write_u16(self.qclass.0);
        Ok(())
    }
}
