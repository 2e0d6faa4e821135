pub fn f() { // want "never reported"
    panic!("f");
}
