pub fn boom() { // want boom:"Panics" b:"Checked\(2\)"
    panic!("boom");
}

pub fn calm() {}
