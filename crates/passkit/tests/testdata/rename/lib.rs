fn bar() {} // want "bar should be baz"

fn main() {
    bar(); // want "bar should be baz"
}
