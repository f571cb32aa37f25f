//! The 64-bit permission bitmap attached to every account.
//!
//! Bit 0 is the most-significant bit of byte 0: bit `i` lives at
//! `byte[i/8] & (1 << (7 - i%8))`. This is the historical on-wire layout and
//! is preserved exactly rather than renumbered for convenience.

/// Symbolic bit positions, in the order the original client/server pair
/// assigned them.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum AccessBit {
    DeleteFile = 0,
    UploadFile = 1,
    DownloadFile = 2,
    RenameFile = 3,
    MoveFile = 4,
    CreateFolder = 5,
    DeleteFolder = 6,
    RenameFolder = 7,
    MoveFolder = 8,
    ReadChat = 9,
    SendChat = 10,
    OpenChat = 11,
    CloseChat = 12,
    ShowInList = 13,
    CreateUser = 14,
    DeleteUser = 15,
    OpenUser = 16,
    ModifyUser = 17,
    ChangeOwnPass = 18,
    NewsReadArt = 19,
    NewsPostArt = 20,
    DisconUser = 21,
    CannotBeDisconnected = 22,
    GetClientInfo = 23,
    UploadAnywhere = 24,
    AnyName = 25,
    NoAgreement = 26,
    SetFileComment = 27,
    SetFolderComment = 28,
    ViewDropBoxes = 29,
    MakeAlias = 30,
    NewsDeleteArt = 31,
    NewsCreateCat = 32,
    NewsDeleteCat = 33,
    NewsCreateFldr = 34,
    NewsDeleteFldr = 35,
    UserAlias = 36,
    UserBroadcast = 37,
    DownloadFolder = 38,
    UploadFolder = 39,
    SendPrivMsg = 40,
}

/// In-memory representation of an account's permission set: 8 bytes,
/// MSB-first bit addressing.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Access(pub [u8; 8]);

impl Access {
    pub const EMPTY: Access = Access([0; 8]);

    pub fn from_bytes(bytes: [u8; 8]) -> Access {
        Access(bytes)
    }

    pub fn to_bytes(self) -> [u8; 8] {
        self.0
    }

    fn byte_and_mask(i: u8) -> (usize, u8) {
        ((i / 8) as usize, 1u8 << (7 - (i % 8)))
    }

    pub fn set(&mut self, bit: AccessBit) {
        let (byte, mask) = Self::byte_and_mask(bit as u8);
        self.0[byte] |= mask;
    }

    pub fn unset(&mut self, bit: AccessBit) {
        let (byte, mask) = Self::byte_and_mask(bit as u8);
        self.0[byte] &= !mask;
    }

    pub fn is_set(&self, bit: AccessBit) -> bool {
        let (byte, mask) = Self::byte_and_mask(bit as u8);
        self.0[byte] & mask != 0
    }

    /// All bits the admin default account is given.
    pub fn all() -> Access {
        let mut a = Access::EMPTY;
        for bit in 0..=40u8 {
            let (byte, mask) = Self::byte_and_mask(bit);
            a.0[byte] |= mask;
        }
        a
    }

    /// Every bit set in `self` is also set in `other`.
    pub fn is_subset_of(&self, other: &Access) -> bool {
        self.0.iter().zip(other.0.iter()).all(|(s, o)| s & o == *s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_named_bit_roundtrips() {
        use AccessBit::*;
        let all = [
            DeleteFile, UploadFile, DownloadFile, RenameFile, MoveFile, CreateFolder,
            DeleteFolder, RenameFolder, MoveFolder, ReadChat, SendChat, OpenChat, CloseChat,
            ShowInList, CreateUser, DeleteUser, OpenUser, ModifyUser, ChangeOwnPass, NewsReadArt,
            NewsPostArt, DisconUser, CannotBeDisconnected, GetClientInfo, UploadAnywhere, AnyName,
            NoAgreement, SetFileComment, SetFolderComment, ViewDropBoxes, MakeAlias,
            NewsDeleteArt, NewsCreateCat, NewsDeleteCat, NewsCreateFldr, NewsDeleteFldr,
            UserAlias, UserBroadcast, DownloadFolder, UploadFolder, SendPrivMsg,
        ];
        for bit in all {
            let mut a = Access::EMPTY;
            a.set(bit);
            assert!(a.is_set(bit), "bit {} did not read back set", bit as u8);
        }
    }

    #[test]
    fn bit_zero_is_msb_of_byte_zero() {
        let mut a = Access::EMPTY;
        a.set(AccessBit::DeleteFile);
        assert_eq!(a.0[0], 0b1000_0000);
    }

    #[test]
    fn bit_one_is_second_msb() {
        let mut a = Access::EMPTY;
        a.set(AccessBit::UploadFile);
        assert_eq!(a.0[0], 0b0100_0000);
    }

    #[test]
    fn send_priv_msg_is_bit_40() {
        let mut a = Access::EMPTY;
        a.set(AccessBit::SendPrivMsg);
        // bit 40 = byte 5, msb
        assert_eq!(a.0[5], 0b1000_0000);
    }

    #[test]
    fn unset_clears_only_that_bit() {
        let mut a = Access::all();
        a.unset(AccessBit::UploadFile);
        assert!(!a.is_set(AccessBit::UploadFile));
        assert!(a.is_set(AccessBit::DeleteFile));
    }
}
