fn main() {
    // Only firmware builds need the ESP-IDF link arguments; host builds run the unit tests.
    if std::env::var("CARGO_CFG_TARGET_OS").as_deref() == Ok("espidf") {
        embuild::espidf::sysenv::output();
    }
}
