use calmform::form::{FormController, FormModel, FormOptions};
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, calmform::form::FormModel)]
pub struct Profile {
    name: String,
    age: u32,
}

fn main() {
    let model = Profile {
        name: "ada".to_string(),
        age: 36,
    };
    let form = FormController::from_model(&model, FormOptions::default()).unwrap();
    let fields = Profile::fields();
    assert_eq!(
        form.value(fields.name()).unwrap(),
        Some(serde_json::json!("ada"))
    );
    let values = form.values().unwrap();
    assert_eq!(values.deserialize::<Profile>().unwrap(), model);
}
