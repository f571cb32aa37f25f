//! Transaction protocol: constants, field identifiers and the core
//! `Transaction`/`Field` types.
//!
//! # Protocol
//! Hotline 1.x transaction protocol.

/// Bytes a client must open a connection with.
pub const HANDSHAKE_MAGIC: &[u8; 4] = b"TRTP";
/// Sub-protocol identifier for the transaction protocol (as opposed to the
/// file-transfer protocol's `HTXF`).
pub const HANDSHAKE_SUBPROTO: &[u8; 4] = b"HOTL";
/// Length of the client's handshake: magic + subproto + version + subversion.
pub const HANDSHAKE_LEN: usize = 12;
/// Length of the server's handshake reply: magic + u32 error.
pub const HANDSHAKE_REPLY_LEN: usize = 8;

/// Fixed-size portion of a transaction, before its fields.
pub const HEADER_LEN: usize = 20;

/// Version the login reply advertises.
pub const SERVER_VERSION: u16 = 0x00BE;

/// Transaction type codes. Values are this implementation's own numbering;
/// wire compatibility with historical clients beyond framing/field shape is
/// out of scope.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum TranType {
    Error = 0,
    GetMsgs = 101,
    NewMsg = 102,
    OldPostNews = 103,
    ServerMsg = 104,
    ChatSend = 105,
    ChatMsg = 106,
    Login = 107,
    SendInstantMsg = 108,
    ShowAgreement = 109,
    Agreed = 121,
    UserAccess = 110,
    NotifyChangeUser = 111,
    NotifyDeleteUser = 112,
    DownloadFile = 200,
    UploadFile = 201,
    DownloadFldr = 202,
    UploadFldr = 203,
    GetFileNameList = 204,
    SetFileInfo = 205,
    GetFileInfo = 212,
    DeleteFile = 206,
    MoveFile = 207,
    NewFolder = 208,
    MakeFileAlias = 209,
    DownloadBanner = 210,
    ServerBanner = 211,
    NewUser = 220,
    DeleteUser = 221,
    GetUser = 222,
    SetUser = 223,
    ListUsers = 224,
    UpdateUser = 225,
    GetClientInfoText = 226,
    DisconnectUser = 227,
    DisconnectMsg = 228,
    UserBroadcast = 229,
    InviteNewChat = 330,
    InviteToChat = 331,
    JoinChat = 332,
    LeaveChat = 333,
    RejectChatInvite = 334,
    SetChatSubject = 335,
    NotifyChatChangeUser = 336,
    NotifyChatDeleteUser = 337,
    NotifyChatSubject = 338,
    GetNewsCatNameList = 370,
    GetNewsArtNameList = 371,
    GetNewsArtData = 372,
    PostNewsArt = 373,
    DelNewsArt = 374,
    DelNewsItem = 375,
    NewNewsCat = 376,
    NewNewsFldr = 377,
    SetClientUserInfo = 400,
    KeepAlive = 500,
}

impl TranType {
    pub fn is_reply_only(self) -> bool {
        matches!(
            self,
            TranType::Error
                | TranType::ChatMsg
                | TranType::ServerMsg
                | TranType::NotifyChangeUser
                | TranType::NotifyDeleteUser
                | TranType::ServerBanner
                | TranType::NotifyChatChangeUser
                | TranType::NotifyChatDeleteUser
                | TranType::NotifyChatSubject
                | TranType::DisconnectMsg
        )
    }
}

impl TryFrom<u16> for TranType {
    type Error = ();

    /// Maps a wire type code back to its symbolic variant. Kept as a manual
    /// match (rather than pulling in a derive-from-primitive crate) since
    /// this is the only place on the decode path that needs it.
    fn try_from(v: u16) -> Result<TranType, ()> {
        use TranType::*;
        Ok(match v {
            0 => Error,
            101 => GetMsgs,
            102 => NewMsg,
            103 => OldPostNews,
            104 => ServerMsg,
            105 => ChatSend,
            106 => ChatMsg,
            107 => Login,
            108 => SendInstantMsg,
            109 => ShowAgreement,
            121 => Agreed,
            110 => UserAccess,
            111 => NotifyChangeUser,
            112 => NotifyDeleteUser,
            200 => DownloadFile,
            201 => UploadFile,
            202 => DownloadFldr,
            203 => UploadFldr,
            204 => GetFileNameList,
            205 => SetFileInfo,
            212 => GetFileInfo,
            206 => DeleteFile,
            207 => MoveFile,
            208 => NewFolder,
            209 => MakeFileAlias,
            210 => DownloadBanner,
            211 => ServerBanner,
            220 => NewUser,
            221 => DeleteUser,
            222 => GetUser,
            223 => SetUser,
            224 => ListUsers,
            225 => UpdateUser,
            226 => GetClientInfoText,
            227 => DisconnectUser,
            228 => DisconnectMsg,
            229 => UserBroadcast,
            330 => InviteNewChat,
            331 => InviteToChat,
            332 => JoinChat,
            333 => LeaveChat,
            334 => RejectChatInvite,
            335 => SetChatSubject,
            336 => NotifyChatChangeUser,
            337 => NotifyChatDeleteUser,
            338 => NotifyChatSubject,
            370 => GetNewsCatNameList,
            371 => GetNewsArtNameList,
            372 => GetNewsArtData,
            373 => PostNewsArt,
            374 => DelNewsArt,
            375 => DelNewsItem,
            376 => NewNewsCat,
            377 => NewNewsFldr,
            400 => SetClientUserInfo,
            500 => KeepAlive,
            _ => return Err(()),
        })
    }
}

/// Field identifiers. Values come from the wire-compatibility table; fields
/// not listed there but needed by a handler are assigned from the same
/// numbering family as their neighbors.
pub mod field {
    pub const ERROR: u16 = 100;
    pub const DATA: u16 = 101;
    pub const USER_NAME: u16 = 102;
    pub const USER_ID: u16 = 103;
    pub const USER_ICON_ID: u16 = 104;
    pub const USER_LOGIN: u16 = 105;
    pub const USER_PASSWORD: u16 = 106;
    pub const REF_NUM: u16 = 107;
    pub const TRANSFER_SIZE: u16 = 108;
    pub const CHAT_OPTIONS: u16 = 109;
    pub const USER_ACCESS: u16 = 110;
    pub const USER_FLAGS: u16 = 112;
    pub const OPTIONS: u16 = 113;
    pub const CHAT_ID: u16 = 114;
    pub const CHAT_SUBJECT: u16 = 115;
    pub const WAITING_COUNT: u16 = 116;
    pub const BANNER_TYPE: u16 = 152;
    pub const NO_SERVER_AGREEMENT: u16 = 152;
    pub const VERSION: u16 = 160;
    pub const COMMUNITY_BANNER_ID: u16 = 161;
    pub const SERVER_NAME: u16 = 162;
    pub const FILE_NAME_WITH_INFO: u16 = 200;
    pub const FILE_NAME: u16 = 201;
    pub const FILE_PATH: u16 = 202;
    pub const FILE_RESUME_DATA: u16 = 203;
    pub const FILE_TRANSFER_OPTIONS: u16 = 204;
    pub const FILE_TYPE_STRING: u16 = 205;
    pub const FILE_CREATOR_STRING: u16 = 206;
    pub const FILE_SIZE: u16 = 207;
    pub const FILE_CREATE_DATE: u16 = 208;
    pub const FILE_MODIFY_DATE: u16 = 209;
    pub const FILE_COMMENT: u16 = 210;
    pub const FILE_NEW_NAME: u16 = 211;
    pub const FILE_NEW_PATH: u16 = 212;
    pub const FILE_TYPE: u16 = 213;
    pub const QUOTING_MSG: u16 = 214;
    pub const AUTOMATIC_RESPONSE: u16 = 215;
    pub const FOLDER_ITEM_COUNT: u16 = 220;
    pub const USERNAME_WITH_INFO: u16 = 300;
    pub const NEWS_ART_LIST_DATA: u16 = 321;
    pub const NEWS_CAT_NAME: u16 = 322;
    pub const NEWS_CAT_LIST_DATA_15: u16 = 323;
    pub const NEWS_PATH: u16 = 325;
    pub const NEWS_ART_ID: u16 = 326;
    pub const NEWS_ART_DATA_FLAV: u16 = 327;
    pub const NEWS_ART_TITLE: u16 = 328;
    pub const NEWS_ART_POSTER: u16 = 329;
    pub const NEWS_ART_DATE: u16 = 330;
    pub const NEWS_ART_PREV_ART: u16 = 331;
    pub const NEWS_ART_NEXT_ART: u16 = 332;
    pub const NEWS_ART_DATA: u16 = 333;
    pub const NEWS_ART_FLAGS: u16 = 334;
    pub const NEWS_ART_PARENT_ART: u16 = 335;
    pub const NEWS_ART_1ST_CHILD_ART: u16 = 336;
    pub const NEWS_ART_RECURSE_DEL: u16 = 337;
}

/// A typed TLV inside a transaction body.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Field {
    pub id: u16,
    pub data: Vec<u8>,
}

impl Field {
    pub fn new(id: u16, data: impl Into<Vec<u8>>) -> Field {
        Field { id: id.into(), data: data.into() }
    }

    pub fn u16(id: u16, value: u16) -> Field {
        Field::new(id, value.to_be_bytes().to_vec())
    }

    pub fn u32(id: u16, value: u32) -> Field {
        Field::new(id, value.to_be_bytes().to_vec())
    }

    pub fn as_u16(&self) -> Option<u16> {
        self.data
            .get(0..2)
            .map(|b| u16::from_be_bytes([b[0], b[1]]))
    }

    pub fn as_u32(&self) -> Option<u32> {
        self.data
            .get(0..4)
            .map(|b| u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }
}

/// The framed request/reply unit of the protocol.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Transaction {
    pub flags: u8,
    pub is_reply: bool,
    pub ty: u16,
    pub id: u32,
    pub error_code: u32,
    pub fields: Vec<Field>,
}

impl Transaction {
    pub fn request(ty: TranType, id: u32, fields: Vec<Field>) -> Transaction {
        Transaction { flags: 0, is_reply: false, ty: ty as u16, id, error_code: 0, fields }
    }

    pub fn reply(id: u32, fields: Vec<Field>) -> Transaction {
        Transaction { flags: 0, is_reply: true, ty: TranType::Error as u16, id, error_code: 0, fields }
    }

    pub fn reply_to(request: &Transaction, fields: Vec<Field>) -> Transaction {
        Transaction { flags: 0, is_reply: true, ty: request.ty, id: request.id, error_code: 0, fields }
    }

    pub fn error_reply(request: &Transaction, message: &str) -> Transaction {
        Transaction {
            flags: 0,
            is_reply: true,
            ty: request.ty,
            id: request.id,
            error_code: 1,
            fields: vec![Field::new(field::ERROR, message.as_bytes().to_vec())],
        }
    }

    pub fn field(&self, id: u16) -> Option<&Field> {
        self.fields.iter().find(|f| f.id == id)
    }

    pub fn field_bytes(&self, id: u16) -> Option<&[u8]> {
        self.field(id).map(|f| f.data.as_slice())
    }

    pub fn field_string(&self, id: u16) -> Option<String> {
        self.field(id).map(|f| String::from_utf8_lossy(&f.data).into_owned())
    }
}

/// Complements each byte (`b -> 255-b`), the wire encoding for login strings.
pub fn obfuscate(bytes: &[u8]) -> Vec<u8> {
    bytes.iter().map(|b| 255 - b).collect()
}

/// Decodes an obfuscated login; an empty login defaults to `"guest"`.
pub fn decode_login(bytes: &[u8]) -> String {
    let plain = obfuscate(bytes);
    if plain.is_empty() {
        "guest".to_owned()
    } else {
        String::from_utf8_lossy(&plain).into_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn obfuscate_is_an_involution() {
        let original = b"foo1".to_vec();
        assert_eq!(obfuscate(&obfuscate(&original)), original);
    }

    #[test]
    fn known_vectors() {
        assert_eq!(obfuscate(b"guest"), vec![0x98, 0x8A, 0x9A, 0x8C, 0x8B]);
        assert_eq!(obfuscate(b"foo1"), vec![0x99, 0x90, 0x90, 0xCE]);
    }

    #[test]
    fn empty_login_defaults_to_guest() {
        assert_eq!(decode_login(&obfuscate(b"")), "guest");
    }

    #[test]
    fn field_u32_roundtrips_big_endian() {
        let f = Field::u32(field::TRANSFER_SIZE, 0x18);
        assert_eq!(f.data, vec![0, 0, 0, 0x18]);
        assert_eq!(f.as_u32(), Some(0x18));
    }
}
