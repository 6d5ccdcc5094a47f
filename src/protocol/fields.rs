use super::Error as ProtocolError;


/// Declares a fieldless enum of wire values together with its conversions:
/// a checked `TryFrom<repr>` failing with the named [`ProtocolError`]
/// variant, and an infallible `From<enum> for repr`.
macro_rules! wire_enum {
    (
        $(#[$meta:meta])*
        pub enum $name:ident: $repr:ty => $err:ident {
            $( $(#[$vmeta:meta])* $variant:ident = $value:literal, )+
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, strum::FromRepr)]
        #[cfg_attr(test, derive(strum::EnumIter))]
        pub enum $name {
            $( $(#[$vmeta])* $variant = $value, )+
        }

        impl TryFrom<$repr> for $name {
            type Error = ProtocolError;

            #[inline]
            fn try_from(v: $repr) -> Result<Self, Self::Error> {
                Self::from_repr(v.into()).ok_or(ProtocolError::$err(v))
            }
        }

        impl From<$name> for $repr {
            #[inline]
            fn from(v: $name) -> Self {
                v as Self
            }
        }
    };
}


wire_enum! {
    /// The protocol version in every record header. Only version 1 exists.
    pub enum Version: u8 => UnknownVersion {
        V1 = 1,
    }
}

wire_enum! {
    /// The role requested by a `BeginRequest` record.
    ///
    /// Roles are parsed for diagnostics only. Every request is served as a
    /// [`Role::Responder`].
    pub enum Role: u16 => UnknownRole {
        Responder = 1,
        Authorizer = 2,
        Filter = 3,
    }
}

wire_enum! {
    /// The protocol-level reason a FastCGI request ended.
    pub enum ProtocolStatus: u8 => UnknownStatus {
        /// The request completed normally.
        RequestComplete = 0,
        /// The web server tried to run a second request over a connection
        /// that is already busy.
        CantMpxConn = 1,
        /// The application ran out of capacity for new requests.
        Overloaded = 2,
        /// The requested role is not implemented.
        UnknownRole = 3,
    }
}

wire_enum! {
    /// The type byte of a FastCGI record header.
    pub enum RecordType: u8 => UnknownRecordType {
        BeginRequest = 1,
        AbortRequest = 2,
        EndRequest = 3,
        Params = 4,
        Stdin = 5,
        Stdout = 6,
        Stderr = 7,
        Data = 8,
        GetValues = 9,
        GetValuesResult = 10,
        Unknown = 11,
    }
}

impl RecordType {
    /// Tests whether records of this type belong to the management protocol
    /// rather than to a request.
    #[inline]
    #[must_use]
    pub fn is_management(self) -> bool {
        use RecordType::*;
        matches!(self, GetValues | GetValuesResult | Unknown)
    }

    /// Tests whether records of this type carry stream data from the web
    /// server to the application.
    #[inline]
    #[must_use]
    pub fn is_input_stream(self) -> bool {
        use RecordType::*;
        matches!(self, Params | Stdin | Data)
    }
}


bitflags::bitflags! {
    /// The flags byte of a `BeginRequest` record.
    #[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct RequestFlags: u8 {
        /// The web server asked to keep the connection open after the request.
        const KeepConn = 1;
    }
}

impl TryFrom<u8> for RequestFlags {
    type Error = ProtocolError;

    /// Accepts only bytes made up of known flags.
    ///
    /// # Errors
    /// Returns [`ProtocolError::UnknownFlags`] with the unknown bits set.
    fn try_from(v: u8) -> Result<Self, Self::Error> {
        match v & !Self::all().bits() {
            0 => Ok(Self::from_bits_retain(v)),
            unk => Err(ProtocolError::UnknownFlags(unk)),
        }
    }
}

impl From<RequestFlags> for u8 {
    #[inline]
    fn from(v: RequestFlags) -> Self {
        v.bits()
    }
}
