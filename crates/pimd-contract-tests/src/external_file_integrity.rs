//! Testable Property 5 (spec §8): for every committed Part with
//! `external=true`, the file at its stored path exists and its on-disk
//! size equals the stored `datasize`; no external file exists outside
//! the configured data root; and replacing a part's content strictly
//! increases its on-disk revision while removing the superseded file
//! (§8 scenario S5).

use std::sync::Arc;

use pimd_storage::{NewItem, NewPart};

use crate::fixtures::{memory_store, seed_resource_and_collection};
use crate::support::{block_on, TckCase, TckSuite};

const THRESHOLD: u64 = 4096;

fn externalizing_a_large_part_writes_a_revision_zero_file_matching_its_size() {
    block_on(async {
        let (store, data_root) = memory_store().await;
        store.set_external_payload_threshold(THRESHOLD);
        let collection_id = seed_resource_and_collection(&store).await;

        let payload = vec![7u8; 5000];
        let mut collector = store.new_collector();
        let (item, parts) = store
            .append_pim_item(
                &mut collector,
                NewItem {
                    mime_type: Arc::from("message/rfc822"),
                    collection_id,
                    remote_id: None,
                    remote_revision: None,
                    gid: None,
                    parts: vec![NewPart {
                        name: Arc::from("PLD:RFC822"),
                        data: payload.clone(),
                    }],
                },
            )
            .await
            .expect("append_pim_item failed");
        collector.commit();

        let part = &parts[0];
        assert!(part.data.is_external(), "a 5000-byte part must externalize past the 4096-byte threshold");
        let filename = match &part.data {
            pimd_model::PartData::External { filename } => filename.to_string(),
            pimd_model::PartData::Inline(_) => unreachable!("just asserted external"),
        };
        assert_eq!(filename, format!("{}_r0", part.id), "a fresh external part's filename must carry revision 0");

        let on_disk = std::fs::metadata(data_root.path().join(&filename)).expect("external file must exist on disk");
        assert_eq!(on_disk.len(), 5000, "on-disk size must equal the declared payload size");
        assert_eq!(part.size, 5000);

        let _ = item;
    });
}

fn replacing_a_part_bumps_the_revision_and_removes_the_old_file() {
    block_on(async {
        let (store, data_root) = memory_store().await;
        store.set_external_payload_threshold(THRESHOLD);
        let collection_id = seed_resource_and_collection(&store).await;

        let mut collector = store.new_collector();
        let (item, _) = store
            .append_pim_item(
                &mut collector,
                NewItem {
                    mime_type: Arc::from("message/rfc822"),
                    collection_id,
                    remote_id: None,
                    remote_revision: None,
                    gid: None,
                    parts: vec![NewPart {
                        name: Arc::from("PLD:RFC822"),
                        data: vec![1u8; 5000],
                    }],
                },
            )
            .await
            .expect("append_pim_item failed");
        collector.commit();

        let mut collector = store.new_collector();
        let updated = store
            .modify_pim_item(
                &mut collector,
                item.id,
                None,
                vec![NewPart {
                    name: Arc::from("PLD:RFC822"),
                    data: vec![2u8; 6000],
                }],
            )
            .await
            .expect("modify_pim_item failed");
        collector.commit();

        assert_eq!(updated.size, 6000);

        let rows = store
            .driver()
            .query("SELECT id, filename, external, size, revision FROM parts WHERE item_id = ?", &[pimd_query::Value::Int(item.id)])
            .await
            .expect("failed to read back the part row");
        assert_eq!(rows.len(), 1, "replacement must reuse the existing part row, not insert a new one");

        use sqlx::Row;
        let row = &rows[0];
        let part_id: i64 = row.try_get("id").unwrap();
        let filename: String = row.try_get("filename").unwrap();
        let external: i64 = row.try_get("external").unwrap();
        let size: i64 = row.try_get("size").unwrap();
        let revision: i64 = row.try_get("revision").unwrap();

        assert_eq!(external, 1);
        assert_eq!(revision, 1, "replacing an external part must strictly increase its revision");
        assert_eq!(filename, format!("{part_id}_r1"));
        assert_eq!(size, 6000);

        let new_path = data_root.path().join(&filename);
        let new_meta = std::fs::metadata(&new_path).expect("replacement file must exist");
        assert_eq!(new_meta.len(), 6000);

        let old_path = data_root.path().join(format!("{part_id}_r0"));
        assert!(!old_path.exists(), "the superseded revision's file must be removed, not left behind");
    });
}

fn a_small_part_stays_inline_and_writes_no_file() {
    block_on(async {
        let (store, data_root) = memory_store().await;
        store.set_external_payload_threshold(THRESHOLD);
        let collection_id = seed_resource_and_collection(&store).await;

        let mut collector = store.new_collector();
        let (_, parts) = store
            .append_pim_item(
                &mut collector,
                NewItem {
                    mime_type: Arc::from("text/vcard"),
                    collection_id,
                    remote_id: None,
                    remote_revision: None,
                    gid: None,
                    parts: vec![NewPart {
                        name: Arc::from("PLD:VCARD"),
                        data: b"BEGIN:VCARD\nEND:VCARD".to_vec(),
                    }],
                },
            )
            .await
            .expect("append_pim_item failed");
        collector.commit();

        assert!(!parts[0].data.is_external());
        let entries = std::fs::read_dir(data_root.path()).expect("data root must be readable").count();
        assert_eq!(entries, 0, "an inline part must not write anything under the data root");
    });
}

const CASES: &[TckCase] = &[
    TckCase {
        name: "externalizing_a_large_part_writes_a_revision_zero_file_matching_its_size",
        test: externalizing_a_large_part_writes_a_revision_zero_file_matching_its_size,
    },
    TckCase {
        name: "replacing_a_part_bumps_the_revision_and_removes_the_old_file",
        test: replacing_a_part_bumps_the_revision_and_removes_the_old_file,
    },
    TckCase {
        name: "a_small_part_stays_inline_and_writes_no_file",
        test: a_small_part_stays_inline_and_writes_no_file,
    },
];

static SUITE: TckSuite = TckSuite {
    name: "external_file_integrity",
    cases: CASES,
};

pub fn suite() -> &'static TckSuite {
    &SUITE
}
