use diesel::{allow_tables_to_appear_in_same_query, table};

table! {
    pixel_configs (id) {
        id -> BigInt,
        shop_id -> Text,
        platform -> Text,
        account_id -> Text,
        enabled -> Bool,
        api_enabled -> Bool,
        credential_ciphertext -> Nullable<Text>,
        test_code -> Nullable<Text>,
        events -> Jsonb,
        last_fired_at -> Nullable<Timestamptz>,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}

table! {
    pixel_logs (id) {
        id -> BigInt,
        shop_id -> Text,
        platform -> Text,
        event -> Text,
        status -> Text,
        payload -> Jsonb,
        error -> Nullable<Text>,
        created_at -> Timestamptz,
    }
}

allow_tables_to_appear_in_same_query!(pixel_configs, pixel_logs);
