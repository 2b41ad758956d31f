use crate::form::FormModel as _;
use serde::Serialize;
use serde_json::{Value, json};

fn assert_send_sync<T: Send + Sync + Clone + 'static>() {}

#[test]
fn prelude_exports_the_form_surface() {
    use crate::prelude::*;

    assert_send_sync::<FormController>();
    let _ = FormOptions::default();
    let _ = ValidationMode::OnSubmit;
    let _ = RevalidateMode::OnInput;
    let _ = ResetOptions::default().keep_values(true);
    let _ = ErrorOptions::default().should_focus(false);
    let _ = SetValueOptions::default().should_validate(false);
    let _ = ValidateOptions::default().should_active(false);
    let _ = FieldArrayConfig::new().keep_active(true);
    let _ = SubmitState::Idle;
    let _ = FormResponse::info("hello");
}

#[derive(Clone, Serialize, crate::form::FormModel)]
struct ApiSmokeForm {
    title: String,
    tags: Vec<String>,
}

fn validate_smoke_title(value: Option<&Value>, _values: &crate::form::FormValues) -> String {
    match value.and_then(Value::as_str) {
        Some(title) if !title.trim().is_empty() => String::new(),
        _ => "required".to_owned(),
    }
}

#[test]
fn form_public_api_smoke_compiles() {
    let controller = crate::form::FormController::from_model(
        &ApiSmokeForm {
            title: "draft".to_owned(),
            tags: vec!["a".to_owned()],
        },
        crate::form::FormOptions::default(),
    )
    .expect("build form");
    let fields = ApiSmokeForm::fields();

    controller
        .register_field(
            fields.title(),
            crate::form::FieldConfig::new().rule(crate::form::Rule::new(validate_smoke_title)),
        )
        .expect("register field");
    controller
        .register_field_array(fields.tags(), crate::form::FieldArrayConfig::new())
        .expect("register field array");
    controller
        .register_field(fields.tags().item(0, "label"), crate::form::FieldConfig::new())
        .expect("register item field");
    controller
        .register_dependency(fields.tags(), fields.title())
        .expect("register dependency");
    futures::executor::block_on(controller.set_value(
        fields.title(),
        json!(""),
        crate::form::SetValueOptions::default(),
    ))
    .expect("set value");
    futures::executor::block_on(controller.blur(fields.title())).expect("blur field");
    futures::executor::block_on(
        controller.validate_form(crate::form::ValidateOptions::default()),
    )
    .expect("validate form");
    let _ = controller
        .field_error_for_display(fields.title())
        .expect("display error");
    futures::executor::block_on(controller.insert_item(fields.tags(), None, json!("b")))
        .expect("insert item");

    let store = crate::form::InMemoryDraftStore::new();
    controller.save_draft(&store, "smoke").expect("save draft");
    controller
        .reset(crate::form::ResetOptions::default())
        .expect("reset");
    let _ = controller.load_draft(&store, "smoke").expect("load draft");
    controller.clear_draft(&store, "smoke").expect("clear draft");
    controller
        .set_response(crate::form::FormResponse::success("saved"))
        .expect("set response");
    let _ = controller.response().expect("read response");
}
