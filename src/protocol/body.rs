use super::Error as ProtocolError;
use super::{ProtocolStatus, RecordHeader, RecordType, RequestFlags, Role};


/// Combines a header for a fixed-size 8-byte body with that body.
#[inline]
fn fixed_record(rtype: RecordType, request_id: u16, body: [u8; 8]) -> [u8; 16] {
    let mut head = RecordHeader::new(rtype, request_id);
    head.set_lengths(8);
    let mut buf = [0; 16];
    buf[..RecordHeader::LEN].copy_from_slice(&head.to_bytes());
    buf[RecordHeader::LEN..].copy_from_slice(&body);
    buf
}


/// The body of a [`RecordType::Unknown`] FastCGI record.
#[derive(Debug, Clone, Copy)]
pub struct UnknownType {
    /// The type of the unknown record.
    pub rtype: u8,
}

impl UnknownType {
    /// Parses the input bytes into a FastCGI [`UnknownType`] record body.
    #[inline]
    #[must_use]
    pub fn from_bytes(data: [u8; 8]) -> Self {
        Self { rtype: data[0] }
    }

    /// Encodes the [`UnknownType`] record body into its binary wire format.
    #[inline]
    #[must_use]
    pub fn to_bytes(self) -> [u8; 8] {
        let mut buf = [0; 8];
        buf[0] = self.rtype;
        buf
    }

    /// Encodes a complete [`RecordType::Unknown`] record, header included.
    #[inline]
    #[must_use]
    pub fn to_record(self, request_id: u16) -> [u8; 16] {
        fixed_record(RecordType::Unknown, request_id, self.to_bytes())
    }
}


/// The body of a [`RecordType::BeginRequest`] FastCGI record.
#[derive(Debug, Clone, Copy)]
pub struct BeginRequest {
    /// The role the web server expects the application to play.
    pub role: Role,
    /// The control flags for this request.
    pub flags: RequestFlags,
}

impl BeginRequest {
    /// The number of bytes in the wire format of a [`BeginRequest`] body.
    pub const LEN: usize = 8;

    /// Parses the input bytes into a FastCGI [`BeginRequest`] record body.
    ///
    /// # Errors
    /// Returns an error if any of the body components are invalid.
    pub fn from_bytes(data: [u8; Self::LEN]) -> Result<Self, ProtocolError> {
        let role = u16::from_be_bytes([data[0], data[1]]);
        Ok(Self {
            role: Role::try_from(role)?,
            flags: RequestFlags::try_from(data[2])?,
        })
    }

    /// Parses a record's content as a [`BeginRequest`] body.
    ///
    /// Returns [`None`] if `content` is not exactly [`BeginRequest::LEN`]
    /// bytes long or does not hold a valid body.
    #[must_use]
    pub fn from_content(content: &[u8]) -> Option<Self> {
        let data = <[u8; Self::LEN]>::try_from(content).ok()?;
        Self::from_bytes(data).ok()
    }

    /// Encodes the [`BeginRequest`] record body into its binary wire format.
    #[must_use]
    pub fn to_bytes(self) -> [u8; Self::LEN] {
        let mut buf = [0; Self::LEN];
        buf[..2].copy_from_slice(&u16::to_be_bytes(self.role.into()));
        buf[2] = self.flags.into();
        buf
    }

    /// Encodes a complete [`RecordType::BeginRequest`] record, header included.
    #[inline]
    #[must_use]
    pub fn to_record(self, request_id: u16) -> [u8; 16] {
        fixed_record(RecordType::BeginRequest, request_id, self.to_bytes())
    }
}


/// The body of a [`RecordType::EndRequest`] FastCGI record.
#[derive(Debug, Clone, Copy)]
pub struct EndRequest {
    /// The application's exit status, as would be set via exit(3) in
    /// regular CGI.
    pub app_status: u32,
    /// The protocol-level reason the request ended.
    pub protocol_status: ProtocolStatus,
}

impl EndRequest {
    /// Parses the input bytes into a FastCGI [`EndRequest`] record body.
    ///
    /// # Errors
    /// Returns an error if any of the body components are invalid.
    pub fn from_bytes(data: [u8; 8]) -> Result<Self, ProtocolError> {
        Ok(Self {
            app_status: u32::from_be_bytes([data[0], data[1], data[2], data[3]]),
            protocol_status: ProtocolStatus::try_from(data[4])?,
        })
    }

    /// Encodes the [`EndRequest`] record body into its binary wire format.
    #[must_use]
    pub fn to_bytes(self) -> [u8; 8] {
        let mut buf = [0; 8];
        buf[..4].copy_from_slice(&u32::to_be_bytes(self.app_status));
        buf[4] = self.protocol_status.into();
        buf
    }

    /// Encodes a complete [`RecordType::EndRequest`] record, header included.
    #[inline]
    #[must_use]
    pub fn to_record(self, request_id: u16) -> [u8; 16] {
        fixed_record(RecordType::EndRequest, request_id, self.to_bytes())
    }
}
