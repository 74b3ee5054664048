use crate::constants::{APP_MANAGED_BY, APP_PART_OF, TESTENV};
use k8s_openapi::api::core::v1::Namespace;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use maplit::btreemap;

/// Defines the namespace a suite's end-to-end stack is deployed into.
pub fn namespace(name: &str, suite: &str) -> Namespace {
    Namespace {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            labels: Some(btreemap! {
                APP_MANAGED_BY.to_string() => TESTENV.to_string(),
                APP_PART_OF.to_string() => suite.to_string(),
            }),
            ..Default::default()
        },
        ..Default::default()
    }
}
