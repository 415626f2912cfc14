fn main() {
    // Recompile when the compile-time defaults change; option_env!() values
    // are otherwise cached.
    println!("cargo:rerun-if-env-changed=LMS_SUPABASE_URL");
    println!("cargo:rerun-if-env-changed=LMS_SUPABASE_PUBLISHABLE_KEY");
}
