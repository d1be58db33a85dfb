//! Registry fixture shared by unit tests.
//!
//! ```text
//! facilities ─┬─ accessions ─┬─ bags
//!             │              ├─ germinationTests ── germinations
//!             │              └─ facility (one-to-one, back to facilities)
//!             └─ accessions (one-to-many)
//! ```

use std::sync::Arc;

use crate::field::{EnumValue, Field};
use crate::registry::{Namespace, SearchRegistry, Sublist};
use crate::table::{JoinOn, TableDescriptor, VisibilityRule};

pub(crate) fn seed_registry() -> Arc<SearchRegistry> {
    SearchRegistry::builder()
        .table(
            TableDescriptor::new("facilities", ["id"])
                .visible_by("id", "facility")
                .with_default_order(["name", "id"]),
        )
        .table(
            TableDescriptor::new("accessions", ["id"])
                .with_parent("facilities", JoinOn::columns("facility_id", "id"))
                .with_visibility(VisibilityRule::InheritFromParent),
        )
        .table(
            TableDescriptor::new("bags", ["id"])
                .with_sql_name("accession_bags")
                .with_parent("accessions", JoinOn::columns("accession_id", "id"))
                .with_visibility(VisibilityRule::InheritFromParent),
        )
        .table(
            TableDescriptor::new("germination_tests", ["id"])
                .with_parent("accessions", JoinOn::columns("accession_id", "id"))
                .with_visibility(VisibilityRule::InheritFromParent),
        )
        .table(
            TableDescriptor::new("germinations", ["id"])
                .with_parent("germination_tests", JoinOn::columns("test_id", "id"))
                .with_visibility(VisibilityRule::InheritFromParent),
        )
        .namespace(
            Namespace::new("accessions", "accessions")
                .with_fields([
                    Field::id("id", "id"),
                    Field::text("accessionNumber", "number"),
                    Field::enumeration(
                        "state",
                        "state_id",
                        vec![
                            EnumValue::new(10, "Pending"),
                            EnumValue::new(20, "Processing"),
                            EnumValue::new(30, "Stored"),
                        ],
                    ),
                    Field::date("collectedDate", "collected_date"),
                    Field::integer("quantity", "quantity"),
                    Field::text("notes", "notes").not_exportable(),
                    Field::alias("bagNumber", "bags_number"),
                ])
                .with_sublist(Sublist::one_to_many(
                    "bags",
                    "bags",
                    JoinOn::columns("id", "accession_id"),
                ))
                .with_sublist(Sublist::one_to_many(
                    "germinationTests",
                    "germinationTests",
                    JoinOn::columns("id", "accession_id"),
                ))
                .with_sublist(Sublist::one_to_one(
                    "facility",
                    "facilities",
                    JoinOn::columns("facility_id", "id"),
                )),
        )
        .namespace(Namespace::new("bags", "bags").with_field(Field::text("number", "bag_number")))
        .namespace(
            Namespace::new("germinationTests", "germination_tests")
                .with_fields([
                    Field::text("testType", "test_type"),
                    Field::integer("seedsSown", "seeds_sown"),
                ])
                .with_sublist(Sublist::one_to_many(
                    "germinations",
                    "germinations",
                    JoinOn::columns("id", "test_id"),
                )),
        )
        .namespace(Namespace::new("germinations", "germinations").with_fields([
            Field::integer("seedsGerminated", "seeds_germinated"),
            Field::date("recordingDate", "recording_date"),
        ]))
        .namespace(
            Namespace::new("facilities", "facilities")
                .with_fields([Field::id("id", "id"), Field::text("name", "name")])
                .with_sublist(Sublist::one_to_many(
                    "accessions",
                    "accessions",
                    JoinOn::columns("id", "facility_id"),
                )),
        )
        .build()
        .expect("fixture registry is valid")
}
