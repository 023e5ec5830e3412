//! Esquema Diesel (escrito a mano). Reemplazable con `diesel print-schema`.

diesel::table! {
    run_events (run_id, seq) {
        run_id -> Uuid,
        seq -> BigInt,
        event_type -> Text,
        payload -> Jsonb,
        ts -> Timestamptz,
    }
}

diesel::table! {
    effects (effect_id) {
        effect_id -> Text,
        run_id -> Uuid,
        step -> Text,
        input_hash -> Text,
        status -> Text,
        result_ref -> Nullable<Jsonb>,
        error -> Nullable<Text>,
        attempts -> Integer,
        created_at -> Timestamptz,
        claimed_at -> Timestamptz,
        completed_at -> Nullable<Timestamptz>,
    }
}

diesel::table! {
    artifacts (run_id, path, version) {
        run_id -> Uuid,
        path -> Text,
        version -> Integer,
        format -> Text,
        content_hash -> Text,
        content -> Jsonb,
        created_at -> Timestamptz,
    }
}

diesel::table! {
    step_execution_errors (id) {
        id -> BigInt,
        run_id -> Uuid,
        step -> Text,
        attempt_number -> Integer,
        error_class -> Text,
        details -> Nullable<Jsonb>,
        ts -> Timestamptz,
    }
}

diesel::allow_tables_to_appear_in_same_query!(run_events, effects, artifacts, step_execution_errors);
