use kube::CustomResourceExt;
use zoneguard::crd::{ZoneAwareUpdate, ZoneDisruptionBudget};

fn main() {
    // Generate both CRDs as a v1 List and print as JSON (kubectl accepts JSON)
    let list = serde_json::json!({
        "apiVersion": "v1",
        "kind": "List",
        "items": [ZoneDisruptionBudget::crd(), ZoneAwareUpdate::crd()],
    });
    let json = serde_json::to_string_pretty(&list).expect("Failed to serialize CRDs to JSON");
    println!("{}", json);
}
