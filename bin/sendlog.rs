fn main() {
    sudoers_iolog::sendlog_main()
}
