//! Known transfer types.

use uuid::Uuid;

/// A kind of transfer a user may submit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferType {
    pub name: &'static str,
    /// Watched directory, relative to the watched root, whose chain starts
    /// transfers of this type.
    pub watched_dir: &'static str,
    /// Chain and link that skip approval when auto-approving.
    pub bypass_chain_id: Uuid,
    pub bypass_link_id: Uuid,
    /// Approval decision point answered automatically under auto-approval.
    pub approval: Option<(Uuid, Uuid)>,
}

const fn id(value: u128) -> Uuid {
    Uuid::from_u128(value)
}

pub const TRANSFER_TYPES: &[TransferType] = &[
    TransferType {
        name: "standard",
        watched_dir: "activeTransfers/standardTransfer",
        bypass_chain_id: id(0x6953950b_c101_4f4c_a0c3_0cd0684afe5e),
        bypass_link_id: id(0x045c43ae_d6cf_44f7_97d6_c8a602748565),
        approval: Some((
            id(0x0c94e6b5_4714_4bec_82c8_e187e0c04d77),
            id(0xb4567e89_9fea_4256_99f5_a88987026488),
        )),
    },
    TransferType {
        name: "zipfile",
        watched_dir: "activeTransfers/zippedDirectory",
        bypass_chain_id: id(0xf3caceff_5ad5_4bad_b98c_e73f8cd03450),
        bypass_link_id: id(0x541f5994_73b0_45bb_9cb5_367c06a21be7),
        approval: None,
    },
    TransferType {
        name: "unzipped bag",
        watched_dir: "activeTransfers/baggitDirectory",
        bypass_chain_id: id(0xc75ef451_2040_4511_95ac_3baa0f019b48),
        bypass_link_id: id(0x154dd501_a344_45a9_97e3_b30093da35f5),
        approval: None,
    },
    TransferType {
        name: "zipped bag",
        watched_dir: "activeTransfers/baggitZippedDirectory",
        bypass_chain_id: id(0x167dc382_4ab1_4051_8e22_e7f1c1bf3e6f),
        bypass_link_id: id(0x3229e01f_adf3_4294_85f7_4acb01b3fbcf),
        approval: None,
    },
    TransferType {
        name: "dspace",
        watched_dir: "activeTransfers/Dspace",
        bypass_chain_id: id(0x1cb2ef0e_afe8_45b5_8d8f_a1e120f06605),
        bypass_link_id: id(0xbda96b35_48c7_44fc_9c9e_d7c5a05016c1),
        approval: None,
    },
    TransferType {
        name: "maildir",
        watched_dir: "activeTransfers/maildir",
        bypass_chain_id: id(0xd381cf76_9313_415f_98a1_55c91e4d78e0),
        bypass_link_id: id(0xda2d650e_8ce3_4b9a_ac97_8ca4744b019f),
        approval: None,
    },
    TransferType {
        name: "TRIM",
        watched_dir: "activeTransfers/TRIM",
        bypass_chain_id: id(0xe4a59e3e_3dba_4eb5_9cf1_c1fb3ae61fa9),
        bypass_link_id: id(0x2483c25a_ade8_4566_a259_c6c37350d0d6),
        approval: None,
    },
    TransferType {
        name: "dataverse",
        watched_dir: "activeTransfers/dataverseTransfer",
        bypass_chain_id: id(0x10c00bc8_8fc2_419f_b593_cf5518695186),
        bypass_link_id: id(0x0af6b163_5455_4a76_978b_e35cc9ee445f),
        approval: None,
    },
];

/// Look up a transfer type by name; empty selects "standard".
pub fn transfer_type(name: &str) -> Option<&'static TransferType> {
    let name = if name.is_empty() { "standard" } else { name };
    TRANSFER_TYPES.iter().find(|t| t.name == name)
}

/// Chain that auto-approval picks at decision point `link_id`, if any.
pub fn auto_approval(link_id: Uuid) -> Option<Uuid> {
    TRANSFER_TYPES
        .iter()
        .filter_map(|t| t.approval)
        .find(|(link, _)| *link == link_id)
        .map(|(_, chain)| chain)
}
