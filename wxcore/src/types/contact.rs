use serde::{Deserialize, Serialize};

/// `ContactFlag` bit set on contacts pinned to the top of the chat list.
pub const CONTACT_FLAG_PINNED: u32 = 2048;
/// `ContactFlag` bit for starred contacts.
pub const CONTACT_FLAG_STARRED: u32 = 64;
/// `VerifyFlag` bit carried by official/service accounts.
pub const VERIFY_FLAG_SERVICE: u32 = 8;

const GROUP_PREFIX: &str = "@@";

/// Whether an opaque `UserName` names a group chat.
pub fn is_group_id(user_name: &str) -> bool {
    user_name.starts_with(GROUP_PREFIX)
}

/// A contact record as the server sends it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct RawContact {
    pub user_name: String,
    pub nick_name: String,
    pub remark_name: String,
    pub head_img_url: String,
    pub contact_flag: u32,
    pub verify_flag: u32,
    pub sex: i32,
    pub signature: String,
    pub province: String,
    pub city: String,
    pub member_count: usize,
    pub member_list: Vec<RawMember>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct RawMember {
    pub user_name: String,
    pub nick_name: String,
    pub display_name: String,
    pub attr_status: u64,
}

/// Attributes every kind of contact shares.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContactProfile {
    pub user_name: String,
    pub nick_name: String,
    pub remark_name: String,
    pub avatar_url: String,
    pub pinned: bool,
    pub starred: bool,
    /// Untouched `ContactFlag`, for bits not surfaced above.
    pub contact_flag: u32,
}

impl ContactProfile {
    /// Remark if the user set one, otherwise the nick name.
    pub fn display_name(&self) -> &str {
        if self.remark_name.is_empty() {
            &self.nick_name
        } else {
            &self.remark_name
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupMember {
    pub user_name: String,
    pub nick_name: String,
    /// Group-specific alias; empty when the member did not set one.
    pub display_name: String,
}

impl From<RawMember> for GroupMember {
    fn from(raw: RawMember) -> Self {
        Self {
            user_name: raw.user_name,
            nick_name: raw.nick_name,
            display_name: raw.display_name,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Group {
    pub profile: ContactProfile,
    pub members: Vec<GroupMember>,
}

impl Group {
    pub fn member(&self, user_name: &str) -> Option<&GroupMember> {
        self.members.iter().find(|m| m.user_name == user_name)
    }
}

/// A cached contact. Variants are decided once, from the raw record, by
/// [`Contact::from_raw`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Contact {
    SelfUser(ContactProfile),
    Friend(ContactProfile),
    Group(Group),
    ServiceAccount(ContactProfile),
}

impl Contact {
    /// Classifies a raw record. `self_user_name` is the logged-in account,
    /// if already known.
    pub fn from_raw(raw: RawContact, self_user_name: Option<&str>) -> Self {
        let profile = ContactProfile {
            pinned: raw.contact_flag & CONTACT_FLAG_PINNED != 0,
            starred: raw.contact_flag & CONTACT_FLAG_STARRED != 0,
            contact_flag: raw.contact_flag,
            user_name: raw.user_name,
            nick_name: raw.nick_name,
            remark_name: raw.remark_name,
            avatar_url: raw.head_img_url,
        };

        if is_group_id(&profile.user_name) {
            Contact::Group(Group {
                profile,
                members: raw.member_list.into_iter().map(GroupMember::from).collect(),
            })
        } else if self_user_name == Some(profile.user_name.as_str()) {
            Contact::SelfUser(profile)
        } else if raw.verify_flag & VERIFY_FLAG_SERVICE != 0 {
            Contact::ServiceAccount(profile)
        } else {
            Contact::Friend(profile)
        }
    }

    pub fn profile(&self) -> &ContactProfile {
        match self {
            Contact::SelfUser(p) | Contact::Friend(p) | Contact::ServiceAccount(p) => p,
            Contact::Group(g) => &g.profile,
        }
    }

    pub fn profile_mut(&mut self) -> &mut ContactProfile {
        match self {
            Contact::SelfUser(p) | Contact::Friend(p) | Contact::ServiceAccount(p) => p,
            Contact::Group(g) => &mut g.profile,
        }
    }

    pub fn id(&self) -> &str {
        &self.profile().user_name
    }

    pub fn is_pinned(&self) -> bool {
        self.profile().pinned
    }

    pub fn as_group(&self) -> Option<&Group> {
        match self {
            Contact::Group(g) => Some(g),
            _ => None,
        }
    }

    /// Sets the pinned flag and keeps the raw flag bits in step.
    pub fn set_pinned(&mut self, pinned: bool) {
        let profile = self.profile_mut();
        profile.pinned = pinned;
        if pinned {
            profile.contact_flag |= CONTACT_FLAG_PINNED;
        } else {
            profile.contact_flag &= !CONTACT_FLAG_PINNED;
        }
    }
}

/// One change to the contact cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContactDelta {
    Upsert(Contact),
    Remove(String),
}
