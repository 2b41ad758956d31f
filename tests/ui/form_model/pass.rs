use calmform::form::FormModel;

#[derive(Clone, calmform::form::FormModel)]
struct SignupForm {
    email: String,
    r#type: String,
}

fn main() {
    let fields = SignupForm::fields();
    assert_eq!(fields.email().as_str(), "email");
    assert_eq!(fields.r#type().as_str(), "type");
    assert_eq!(SignupForm::FIELD_NAMES, &["email", "type"]);
    assert_eq!(SignupForm::field_keys().len(), 2);
}
