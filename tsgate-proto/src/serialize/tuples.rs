use bytes::BytesMut;

use super::{ByteRead, ByteWrite};
use crate::MalformedPdu;

impl<T0: ByteWrite, T1: ByteWrite> ByteWrite for (T0, T1) {
    fn write(&self, buf: &mut BytesMut) {
        self.0.write(buf);
        self.1.write(buf);
    }
}

impl<T0: ByteRead, T1: ByteRead> ByteRead for (T0, T1) {
    fn read(buf: &mut &[u8]) -> Result<Self, MalformedPdu> {
        Ok((T0::read(buf)?, T1::read(buf)?))
    }
}

impl<T0: ByteWrite, T1: ByteWrite, T2: ByteWrite> ByteWrite for (T0, T1, T2) {
    fn write(&self, buf: &mut BytesMut) {
        self.0.write(buf);
        self.1.write(buf);
        self.2.write(buf);
    }
}

impl<T0: ByteRead, T1: ByteRead, T2: ByteRead> ByteRead for (T0, T1, T2) {
    fn read(buf: &mut &[u8]) -> Result<Self, MalformedPdu> {
        Ok((T0::read(buf)?, T1::read(buf)?, T2::read(buf)?))
    }
}

impl<T0: ByteWrite, T1: ByteWrite, T2: ByteWrite, T3: ByteWrite> ByteWrite for (T0, T1, T2, T3) {
    fn write(&self, buf: &mut BytesMut) {
        self.0.write(buf);
        self.1.write(buf);
        self.2.write(buf);
        self.3.write(buf);
    }
}

impl<T0: ByteRead, T1: ByteRead, T2: ByteRead, T3: ByteRead> ByteRead for (T0, T1, T2, T3) {
    fn read(buf: &mut &[u8]) -> Result<Self, MalformedPdu> {
        Ok((T0::read(buf)?, T1::read(buf)?, T2::read(buf)?, T3::read(buf)?))
    }
}

impl<T0: ByteWrite, T1: ByteWrite, T2: ByteWrite, T3: ByteWrite, T4: ByteWrite> ByteWrite for (T0, T1, T2, T3, T4) {
    fn write(&self, buf: &mut BytesMut) {
        self.0.write(buf);
        self.1.write(buf);
        self.2.write(buf);
        self.3.write(buf);
        self.4.write(buf);
    }
}

impl<T0: ByteRead, T1: ByteRead, T2: ByteRead, T3: ByteRead, T4: ByteRead> ByteRead for (T0, T1, T2, T3, T4) {
    fn read(buf: &mut &[u8]) -> Result<Self, MalformedPdu> {
        Ok((
            T0::read(buf)?,
            T1::read(buf)?,
            T2::read(buf)?,
            T3::read(buf)?,
            T4::read(buf)?,
        ))
    }
}
